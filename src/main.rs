fn main() {
    if let Err(err) = member_ledger::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
