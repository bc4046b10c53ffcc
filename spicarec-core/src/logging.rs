pub fn init() {
    use env_logger::Target;
    use std::fs;
    use std::io;

    // Prefer a stable log file the operator can pull off the device after
    // a session. If we cannot create it (read-only tmpfs, permissions),
    // fall back to stderr.
    let target = (|| -> io::Result<Target> {
        fs::create_dir_all("/tmp/spicarec")?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open("/tmp/spicarec/recovery.log")?;
        Ok(Target::Pipe(Box::new(file)))
    })()
    .unwrap_or(Target::Stderr);

    env_logger::Builder::from_default_env()
        .target(target)
        .filter_level(log::LevelFilter::Info)
        .init();
}
