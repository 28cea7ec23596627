fn main() {
    if let Err(err) = fleetstat::cli::run() {
        fleetstat::ui::eprintln_error(&err);
        std::process::exit(fleetstat::exit::exit_code(&err));
    }
}
