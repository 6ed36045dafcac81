mod audio;
mod config;
mod console;
mod controller;
mod error;
mod monitor;
mod net_link;
mod protocol;
mod state_machine;

use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;

use audio::AlsaBackend;
use config::{Config, Language, ProficiencyLevel, SessionConfig};
use console::{ActivityHint, Console, ConsoleCommand};
use controller::SessionController;
use error::SessionError;
use net_link::{SessionEvent, WsTransport};

/// Spoken conversation practice with a live AI tutor.
#[derive(Parser, Debug)]
#[command(name = env!("APP_NAME"), version = env!("APP_VERSION"))]
struct Cli {
    /// Language code to practice, e.g. es, fr, de, ja, en
    #[arg(long)]
    language: Option<String>,

    /// beginner, intermediate or advanced
    #[arg(long)]
    level: Option<ProficiencyLevel>,

    /// Print the available languages and exit
    #[arg(long)]
    list_languages: bool,

    /// Wait for `start` instead of connecting right away
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    let cli = Cli::parse();
    if cli.list_languages {
        console::print_languages();
        return Ok(());
    }

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;

    let mut next_session = config.default_session();
    if let Some(code) = &cli.language {
        next_session.language =
            Language::find(code).ok_or_else(|| anyhow!("unknown language code '{}'", code))?;
    }
    if let Some(level) = cli.level {
        next_session.level = level;
    }

    let credential = config.credential();
    if credential.is_none() {
        log::warn!(
            "No API credential found in ${} or $API_KEY",
            config.credential_env
        );
    }

    // 会话事件通道
    let (tx_session_event, mut rx_session_event) = mpsc::channel::<SessionEvent>(100);
    // 控制台命令通道
    let (tx_console, mut rx_console) = mpsc::channel::<ConsoleCommand>(16);

    let backend = Arc::new(AlsaBackend::new(
        config.capture_device.clone(),
        config.playback_device.clone(),
    ));
    let transport = Arc::new(WsTransport::new(config.ws_url));
    let mut controller =
        SessionController::new(config.clone(), backend, transport, credential, tx_session_event);
    let mut status_rx = controller.subscribe_status();
    let mut volume_rx = controller.subscribe_volume();

    // 控制台线程阻塞读取 stdin，退出时不等待它
    Console::new(tx_console).spawn()?;

    println!(
        "{} {} - type 'help' for commands",
        env!("APP_NAME"),
        env!("APP_VERSION")
    );
    if !cli.no_autostart {
        start_session(&mut controller, &next_session).await;
    }

    let mut hint = ActivityHint::default();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break;
            }

            // 网络链路事件
            Some(event) = rx_session_event.recv() => {
                controller.handle_event(event).await;
            }

            // 控制台命令
            Some(cmd) = rx_console.recv() => match cmd {
                ConsoleCommand::Start => start_session(&mut controller, &next_session).await,
                ConsoleCommand::Stop => controller.stop().await,
                ConsoleCommand::Language(language) => {
                    println!("Next session: {}", language.display_name);
                    next_session.language = language;
                }
                ConsoleCommand::Level(level) => {
                    println!("Next session: {}", level);
                    next_session.level = level;
                }
                ConsoleCommand::Status => console::print_snapshot(&controller.snapshot(), &next_session),
                ConsoleCommand::Languages => console::print_languages(),
                ConsoleCommand::Help => console::print_help(),
                ConsoleCommand::Quit => break,
            },

            Ok(()) = status_rx.changed() => {
                let status = status_rx.borrow_and_update().clone();
                println!("{}", console::describe(&status));
                if !status.state.is_active() {
                    hint.reset();
                }
            }

            Ok(()) = volume_rx.changed() => {
                let volume = *volume_rx.borrow_and_update();
                if let Some(text) = hint.update(volume) {
                    println!("{}", text);
                }
            }
        }
    }

    controller.stop().await;
    Ok(())
}

async fn start_session(controller: &mut SessionController, session: &SessionConfig) {
    match controller.start(session.clone()).await {
        Ok(()) => {}
        // 其他错误已经通过状态通道显示
        Err(e @ SessionError::AlreadyActive) => println!("{}", e.user_message()),
        Err(e) => log::debug!("Start failed: {}", e),
    }
}
