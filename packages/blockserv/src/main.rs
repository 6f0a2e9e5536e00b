#[macro_use]
extern crate tracing;

use blockserv::{
    logging::init_logging,
    producer::NoiseProducer,
    server::ServerHandle,
    settings::{
        Settings,
        SETTINGS_FILE_NAME,
    },
    transport::LogTransport,
};
use std::{
    env::args,
    path::Path,
    thread,
};
use crossbeam_channel::{
    bounded,
    Sender,
};


const CLI_INTRO: &'static str = r#"blockserv, a block world dedicated server."#;

const CLI_HELP: &'static str = r#"
Examples:

    [this command]
    Run the server.

    [this command] --settings=server_settings.json
    Run the server with an explicit settings file.

Env var examples:
    RUST_LOG=blockserv=trace
    Changes logging levels"#;


fn main() {
    println!("{}", CLI_INTRO);
    init_logging();
    let args = args().collect::<Vec<_>>();
    if args.get(1).map(String::as_str) == Some("--help") {
        println!("{}", CLI_HELP);
    } else {
        run_server_from_cli(&args);
    }
}

// parse CLI args and run server from that
fn run_server_from_cli(args: &Vec<String>) {
    info!("starting server");
    let settings_path = args.iter()
        .filter_map(|arg| arg.strip_prefix("--settings="))
        .next()
        .unwrap_or(SETTINGS_FILE_NAME);
    run_server(settings_path);
}

// run server until the process is told to die
fn run_server(settings_path: &str) {
    let settings = load_or_create_settings(settings_path);
    let seed = settings.world_seed.unwrap_or_else(rand::random);
    info!(seed, "world seed");
    let server = ServerHandle::start(settings, NoiseProducer::new(seed), LogTransport);
    let (stop_send, stop_recv) = bounded(1);
    stop_on_kill(stop_send);
    let _ = stop_recv.recv();
    info!("stopping server (process received kill signal)");
    server.stop();
}

// read the settings file, writing the defaults there if there is none
fn load_or_create_settings(path: &str) -> Settings {
    if Path::new(path).exists() {
        match Settings::try_read(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(%e, %path, "unreadable settings file, using defaults");
                Settings::default()
            }
        }
    } else {
        let settings = Settings::default();
        match settings.write(path) {
            Ok(()) => info!(%path, "wrote default settings file"),
            Err(e) => warn!(%e, %path, "error writing default settings file"),
        }
        settings
    }
}

// hook up kill signals to graceful server shutdown
fn stop_on_kill(stop_send: Sender<()>) {
    let result = ctrlc::set_handler(move || {
        let stop_send = stop_send.clone();
        // send from another thread, the signal handler context is not one to block in
        thread::spawn(move || {
            let _ = stop_send.send(());
        });
    });
    if let Err(e) = result {
        warn!(%e, "error setting kill signal handler");
    }
}
