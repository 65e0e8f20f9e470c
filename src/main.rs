fn main() {
    if let Err(err) = hmp_detector_lib::run() {
        eprintln!("hmp-detector: {err:#}");
        std::process::exit(1);
    }
}
