fn main() {
    if let Err(err) = ev_logbook::app::run_sync() {
        eprintln!("sync service startup failed: {err}");
        std::process::exit(1);
    }
}
