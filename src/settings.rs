use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reveal::Granularity;

/// What to do when the service answers without usable content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmptyAnswerPolicy {
    /// Commit the fixed fallback reply.
    #[default]
    Degrade,
    /// Treat it like a transport failure and roll the user turn back.
    Rollback,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Endpoints {
    pub chat_url: Option<String>,
    pub document_chat_url: Option<String>,
    pub upload_url: Option<String>,
    pub delete_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RevealParams {
    pub granularity: Option<Granularity>,
    pub step_delay_ms: Option<u64>,
}

/// Config file contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GlobalConfigDefaults {
    pub endpoints: Option<Endpoints>,
    pub reveal: Option<RevealParams>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub database_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub empty_answer: Option<EmptyAnswerPolicy>,
}

/// Values taken from `DOCCHAT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvOverrides {
    pub endpoints: Endpoints,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub database_url: Option<String>,
}

/// Values given on the command line; highest precedence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestOverrides {
    pub endpoints: Endpoints,
    pub reveal: RevealParams,
    pub user_id: Option<String>,
    pub database_url: Option<String>,
    pub empty_answer: Option<EmptyAnswerPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub endpoints: Endpoints,
    pub granularity: Granularity,
    pub step_delay: Duration,
    pub user_id: String,
    pub api_key: Option<String>,
    pub database_url: Option<String>,
    pub request_timeout: Duration,
    pub empty_answer: EmptyAnswerPolicy,
}

pub const DEFAULT_USER_ID: &str = "local";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

impl GlobalConfigDefaults {
    /// Reads the JSON config file. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let parsed = serde_json::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
                tracing::debug!(path = %path.display(), "loaded config file");
                Ok(parsed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }
}

fn default_config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".config")
    });
    base.join("docchat").join("config.json")
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            endpoints: Endpoints {
                chat_url: get("DOCCHAT_CHAT_URL"),
                document_chat_url: get("DOCCHAT_DOCUMENT_CHAT_URL"),
                upload_url: get("DOCCHAT_UPLOAD_URL"),
                delete_url: get("DOCCHAT_DELETE_URL"),
            },
            user_id: get("DOCCHAT_USER_ID"),
            api_key: get("DOCCHAT_API_KEY"),
            database_url: get("DOCCHAT_DATABASE_URL"),
        }
    }
}

pub fn resolve_effective_settings(
    global: &GlobalConfigDefaults,
    env: &EnvOverrides,
    request: &RequestOverrides,
) -> EffectiveSettings {
    let file_endpoints = global.endpoints.clone().unwrap_or_default();
    let endpoints = Endpoints {
        chat_url: request
            .endpoints
            .chat_url
            .clone()
            .or_else(|| env.endpoints.chat_url.clone())
            .or_else(|| file_endpoints.chat_url.clone()),
        document_chat_url: request
            .endpoints
            .document_chat_url
            .clone()
            .or_else(|| env.endpoints.document_chat_url.clone())
            .or_else(|| file_endpoints.document_chat_url.clone()),
        upload_url: request
            .endpoints
            .upload_url
            .clone()
            .or_else(|| env.endpoints.upload_url.clone())
            .or_else(|| file_endpoints.upload_url.clone()),
        delete_url: request
            .endpoints
            .delete_url
            .clone()
            .or_else(|| env.endpoints.delete_url.clone())
            .or_else(|| file_endpoints.delete_url.clone()),
    };

    let granularity = request
        .reveal
        .granularity
        .or_else(|| global.reveal.as_ref().and_then(|r| r.granularity))
        .unwrap_or_default();
    let step_delay = request
        .reveal
        .step_delay_ms
        .or_else(|| global.reveal.as_ref().and_then(|r| r.step_delay_ms))
        .map(Duration::from_millis)
        .unwrap_or_else(|| granularity.default_step_delay());

    EffectiveSettings {
        endpoints,
        granularity,
        step_delay,
        user_id: request
            .user_id
            .clone()
            .or_else(|| env.user_id.clone())
            .or_else(|| global.user_id.clone())
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
        api_key: env.api_key.clone().or_else(|| global.api_key.clone()),
        database_url: request
            .database_url
            .clone()
            .or_else(|| env.database_url.clone())
            .or_else(|| global.database_url.clone()),
        request_timeout: Duration::from_secs(
            global.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        ),
        empty_answer: request.empty_answer.or(global.empty_answer).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn precedence_request_over_env_over_file() {
        let global = GlobalConfigDefaults {
            endpoints: Some(Endpoints {
                chat_url: Some("http://file/chat".into()),
                document_chat_url: Some("http://file/pdf-chat".into()),
                upload_url: Some("http://file/upload".into()),
                delete_url: None,
            }),
            reveal: Some(RevealParams { granularity: Some(Granularity::Word), step_delay_ms: None }),
            user_id: Some("file-user".into()),
            api_key: Some("file-key".into()),
            database_url: None,
            request_timeout_secs: Some(5),
            empty_answer: Some(EmptyAnswerPolicy::Rollback),
        };

        let vars: HashMap<&str, &str> = [
            ("DOCCHAT_CHAT_URL", "http://env/chat"),
            ("DOCCHAT_UPLOAD_URL", "http://env/upload"),
            ("DOCCHAT_USER_ID", "env-user"),
            ("DOCCHAT_DELETE_URL", "   "),
        ]
        .into_iter()
        .collect();
        let env = EnvOverrides::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        let request = RequestOverrides {
            endpoints: Endpoints { upload_url: Some("http://cli/upload".into()), ..Default::default() },
            reveal: RevealParams::default(),
            user_id: None,
            database_url: Some("sqlite::memory:".into()),
            empty_answer: None,
        };

        let eff = resolve_effective_settings(&global, &env, &request);

        assert_eq!(eff.endpoints.chat_url.as_deref(), Some("http://env/chat"));
        assert_eq!(eff.endpoints.document_chat_url.as_deref(), Some("http://file/pdf-chat"));
        assert_eq!(eff.endpoints.upload_url.as_deref(), Some("http://cli/upload"));
        assert_eq!(eff.endpoints.delete_url, None); // blank env value ignored
        assert_eq!(eff.user_id, "env-user");
        assert_eq!(eff.api_key.as_deref(), Some("file-key"));
        assert_eq!(eff.database_url.as_deref(), Some("sqlite::memory:"));
        assert_eq!(eff.granularity, Granularity::Word);
        assert_eq!(eff.step_delay, Duration::from_millis(5));
        assert_eq!(eff.request_timeout, Duration::from_secs(5));
        assert_eq!(eff.empty_answer, EmptyAnswerPolicy::Rollback);
    }

    #[test]
    fn defaults_when_nothing_configured() {
        let eff = resolve_effective_settings(
            &GlobalConfigDefaults::default(),
            &EnvOverrides::default(),
            &RequestOverrides::default(),
        );
        assert_eq!(eff.user_id, DEFAULT_USER_ID);
        assert_eq!(eff.granularity, Granularity::Character);
        assert_eq!(eff.step_delay, Duration::from_millis(20));
        assert_eq!(eff.request_timeout, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
        assert_eq!(eff.empty_answer, EmptyAnswerPolicy::Degrade);
        assert_eq!(eff.endpoints, Endpoints::default());
    }

    #[test]
    fn config_file_loads_and_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let missing = GlobalConfigDefaults::load(Some(&dir.path().join("nope.json"))).unwrap();
        assert_eq!(missing, GlobalConfigDefaults::default());

        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"endpoints":{"chat_url":"http://localhost:5678/webhook/chatbot"},"reveal":{"granularity":"word","step_delay_ms":0},"empty_answer":"rollback"}"#,
        )
        .unwrap();
        let cfg = GlobalConfigDefaults::load(Some(&path)).unwrap();
        assert_eq!(
            cfg.endpoints.and_then(|e| e.chat_url).as_deref(),
            Some("http://localhost:5678/webhook/chatbot")
        );
        assert_eq!(cfg.reveal.and_then(|r| r.step_delay_ms), Some(0));
        assert_eq!(cfg.empty_answer, Some(EmptyAnswerPolicy::Rollback));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(GlobalConfigDefaults::load(Some(&path)).is_err());
    }
}
