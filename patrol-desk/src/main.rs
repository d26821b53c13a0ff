fn main() {
    tracing_subscriber::fmt::init();

    let demo_mode = std::env::args().any(|arg| arg == "--demo");
    let result = if demo_mode {
        patrol_desk::run_demo()
    } else {
        patrol_desk::run()
    };

    if let Err(err) = result {
        eprintln!("failed to start patrol desk backend: {err}");
    }
}
