use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    service: Service,
    audio: Audio,
    monitor: Monitor,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Service {
    ws_url: String,
    model: String,
    connect_timeout_secs: u64,
    credential_env: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    playback_sample_rate: u32,
    capture_frame_size: usize,
    playback_period_size: usize,
    outbound_queue_frames: usize,
}

#[derive(Deserialize)]
struct Monitor {
    refresh_hz: u32,
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

#[derive(Deserialize)]
struct Session {
    default_language: String,
    default_level: String,
}

// 在编译时读取 config.toml 并设置环境变量
// API key 不在这里，运行时从环境变量读取
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 服务配置
    println!("cargo:rustc-env=WS_URL={}", config.service.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.service.model);
    println!("cargo:rustc-env=CONNECT_TIMEOUT_SECS={}", config.service.connect_timeout_secs);
    println!("cargo:rustc-env=CREDENTIAL_ENV={}", config.service.credential_env);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.audio.capture_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=CAPTURE_FRAME_SIZE={}", config.audio.capture_frame_size);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);
    println!("cargo:rustc-env=OUTBOUND_QUEUE_FRAMES={}", config.audio.outbound_queue_frames);

    // 音量监视器
    println!("cargo:rustc-env=MONITOR_REFRESH_HZ={}", config.monitor.refresh_hz);
    println!("cargo:rustc-env=MONITOR_FFT_SIZE={}", config.monitor.fft_size);
    println!("cargo:rustc-env=MONITOR_SMOOTHING={}", config.monitor.smoothing);
    println!("cargo:rustc-env=MONITOR_MIN_DB={}", config.monitor.min_decibels);
    println!("cargo:rustc-env=MONITOR_MAX_DB={}", config.monitor.max_decibels);

    // 会话默认值
    println!("cargo:rustc-env=DEFAULT_LANGUAGE={}", config.session.default_language);
    println!("cargo:rustc-env=DEFAULT_LEVEL={}", config.session.default_level);
}
