use std::process;

fn main() {
    if let Err(err) = poolledger::app::run() {
        eprintln!("fatal: {err}");
        process::exit(1);
    }
}
