use anyhow::Result;
use env_logger::{Builder, Env};

mod cli;
mod cmd_init;
mod cmd_status;
mod cmd_check;
mod cmd_page;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе дефолт — info.
    // Пример: RUST_LOG=debug ./mappager status --path ./store.bin
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    match cli.cmd {
        cli::Cmd::Init { path, capacity, page_size } => cmd_init::exec(path, capacity, page_size),

        cli::Cmd::Status { path, json } => cmd_status::exec(path, json),

        cli::Cmd::Check { path, json } => cmd_check::exec(path, json),

        cli::Cmd::Page { path, page, json } => cmd_page::exec(path, page, json),
    }
}
