use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // 服务配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub connect_timeout: Duration,
    pub credential_env: &'static str,

    // 音频配置
    pub capture_device: String,
    pub playback_device: String,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_frame_size: usize,
    pub playback_period_size: usize,
    pub outbound_queue_frames: usize,

    // 音量监视器配置
    pub monitor_refresh_hz: u32,
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,

    // 会话默认值
    pub default_language: &'static str,
    pub default_level: &'static str,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL"),
            model: env!("LIVE_MODEL"),
            connect_timeout: Duration::from_secs(
                env!("CONNECT_TIMEOUT_SECS")
                    .parse()
                    .map_err(|_| "Failed to parse CONNECT_TIMEOUT_SECS")?,
            ),
            credential_env: env!("CREDENTIAL_ENV"),

            capture_device: env!("CAPTURE_DEVICE").to_string(),
            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            capture_frame_size: env!("CAPTURE_FRAME_SIZE").parse()
                .map_err(|_| "Failed to parse CAPTURE_FRAME_SIZE")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            outbound_queue_frames: env!("OUTBOUND_QUEUE_FRAMES").parse()
                .map_err(|_| "Failed to parse OUTBOUND_QUEUE_FRAMES")?,

            monitor_refresh_hz: env!("MONITOR_REFRESH_HZ").parse()
                .map_err(|_| "Failed to parse MONITOR_REFRESH_HZ")?,
            fft_size: env!("MONITOR_FFT_SIZE").parse()
                .map_err(|_| "Failed to parse MONITOR_FFT_SIZE")?,
            smoothing: env!("MONITOR_SMOOTHING").parse()
                .map_err(|_| "Failed to parse MONITOR_SMOOTHING")?,
            min_decibels: env!("MONITOR_MIN_DB").parse()
                .map_err(|_| "Failed to parse MONITOR_MIN_DB")?,
            max_decibels: env!("MONITOR_MAX_DB").parse()
                .map_err(|_| "Failed to parse MONITOR_MAX_DB")?,

            default_language: env!("DEFAULT_LANGUAGE"),
            default_level: env!("DEFAULT_LEVEL"),
        })
    }

    /// Reads the API credential from the configured variable, falling back to `API_KEY`.
    pub fn credential(&self) -> Option<Credential> {
        self.credential_from(|name| std::env::var(name).ok())
    }

    /// A blank value counts as unset, so the next variable is tried.
    fn credential_from(&self, lookup: impl Fn(&str) -> Option<String>) -> Option<Credential> {
        [self.credential_env, "API_KEY"]
            .into_iter()
            .find_map(|name| lookup(name).and_then(Credential::new))
    }

    /// The session settings the presentation starts with.
    pub fn default_session(&self) -> SessionConfig {
        let language = Language::find(self.default_language)
            .unwrap_or_else(|| LANGUAGES[0].clone_owned());
        let level = self.default_level.parse().unwrap_or(ProficiencyLevel::Beginner);
        SessionConfig { language, level }
    }
}

/// Service API key. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Blank strings count as "not configured".
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub code: String,
    pub display_name: String,
    /// Prebuilt voice the service speaks with.
    pub voice: String,
}

/// Catalog entry, kept `'static` so the list can live in a const.
pub struct LanguageEntry {
    pub code: &'static str,
    pub display_name: &'static str,
    pub voice: &'static str,
}

impl LanguageEntry {
    pub fn clone_owned(&self) -> Language {
        Language {
            code: self.code.to_string(),
            display_name: self.display_name.to_string(),
            voice: self.voice.to_string(),
        }
    }
}

pub const LANGUAGES: &[LanguageEntry] = &[
    LanguageEntry { code: "es", display_name: "Spanish", voice: "Puck" },
    LanguageEntry { code: "fr", display_name: "French", voice: "Charon" },
    LanguageEntry { code: "de", display_name: "German", voice: "Fenrir" },
    LanguageEntry { code: "ja", display_name: "Japanese", voice: "Kore" },
    LanguageEntry { code: "en", display_name: "English", voice: "Zephyr" },
];

impl Language {
    pub fn find(code: &str) -> Option<Language> {
        LANGUAGES
            .iter()
            .find(|entry| entry.code.eq_ignore_ascii_case(code.trim()))
            .map(LanguageEntry::clone_owned)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProficiencyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl fmt::Display for ProficiencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProficiencyLevel::Beginner => "Beginner",
            ProficiencyLevel::Intermediate => "Intermediate",
            ProficiencyLevel::Advanced => "Advanced",
        };
        f.write_str(name)
    }
}

impl FromStr for ProficiencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(ProficiencyLevel::Beginner),
            "intermediate" => Ok(ProficiencyLevel::Intermediate),
            "advanced" => Ok(ProficiencyLevel::Advanced),
            other => Err(format!("unknown proficiency level: {}", other)),
        }
    }
}

/// Settings of one practice session. Cloned into the controller at start,
/// so edits only apply to the next session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub language: Language,
    pub level: ProficiencyLevel,
}

impl SessionConfig {
    /// Tutor directive sent as the session's system instruction.
    pub fn system_instruction(&self) -> String {
        let language = &self.language.display_name;
        let level = self.level;
        format!(
            "You are a friendly and helpful language tutor. \
             The user wants to practice {language}. \
             Your goal is to have a natural conversation in {language}. \
             The user's proficiency level is {level}. \
             If they make grammar mistakes, gently correct them in the flow of conversation, \
             but keep it encouraging. \
             Speak clearly and at a moderate pace suitable for a {level} learner."
        )
    }
}
