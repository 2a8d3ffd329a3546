fn main() {
    #[cfg(feature = "cli")]
    swu_delta::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("swu-delta: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
