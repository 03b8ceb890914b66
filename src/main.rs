fn main() {
    if let Err(err) = ev_logbook::app::run() {
        eprintln!("application startup failed: {err}");
        std::process::exit(1);
    }
}
