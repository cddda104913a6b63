//! CI provider detection from the process environment.
//!
//! Providers are checked in a fixed priority order and the first whose
//! pipeline variable is set wins. Nested CI setups (e.g. a Jenkins agent
//! launched from a GitLab job) therefore classify as the higher-priority
//! provider:
//!
//! 1. GitLab (`CI_PIPELINE_ID`, `CI_JOB_ID`)
//! 2. Jenkins (`BUILD_NUMBER`, `JOB_NAME`)
//! 3. GitHub Actions (`GITHUB_RUN_ID`, `GITHUB_JOB`)
//! 4. CircleCI (`CIRCLE_BUILD_NUM`, `CIRCLE_JOB`)

use serde::{Deserialize, Serialize};

/// Known CI providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiProvider {
    Gitlab,
    Jenkins,
    Github,
    Circleci,
}

impl CiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiProvider::Gitlab => "gitlab",
            CiProvider::Jenkins => "jenkins",
            CiProvider::Github => "github",
            CiProvider::Circleci => "circleci",
        }
    }
}

impl std::fmt::Display for CiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Signature {
    provider: CiProvider,
    pipeline_var: &'static str,
    job_var: &'static str,
}

/// Detection order. Earlier entries take precedence.
const SIGNATURES: [Signature; 4] = [
    Signature {
        provider: CiProvider::Gitlab,
        pipeline_var: "CI_PIPELINE_ID",
        job_var: "CI_JOB_ID",
    },
    Signature {
        provider: CiProvider::Jenkins,
        pipeline_var: "BUILD_NUMBER",
        job_var: "JOB_NAME",
    },
    Signature {
        provider: CiProvider::Github,
        pipeline_var: "GITHUB_RUN_ID",
        job_var: "GITHUB_JOB",
    },
    Signature {
        provider: CiProvider::Circleci,
        pipeline_var: "CIRCLE_BUILD_NUM",
        job_var: "CIRCLE_JOB",
    },
];

/// The CI execution context the relay runs in.
///
/// Serialises as `{provider, pipeline_id, job_id}` with empty strings when
/// no provider was recognised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CiContext {
    #[serde(with = "provider_field")]
    pub provider: Option<CiProvider>,
    pub pipeline_id: String,
    pub job_id: String,
}

impl CiContext {
    /// Classify the current process environment.
    pub fn detect() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Classify using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        for sig in &SIGNATURES {
            if let Some(pipeline_id) = non_empty(sig.pipeline_var) {
                return CiContext {
                    provider: Some(sig.provider),
                    pipeline_id,
                    job_id: non_empty(sig.job_var).unwrap_or_default(),
                };
            }
        }
        CiContext::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.provider.is_none()
    }
}

mod provider_field {
    use super::CiProvider;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        provider: &Option<CiProvider>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(provider.map(|p| p.as_str()).unwrap_or(""))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<CiProvider>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(serde_json::Value::String(raw))
            .map(Some)
            .map_err(serde::de::Error::custom)
    }
}
