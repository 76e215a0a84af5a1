//! Configuration loading: a YAML file selected by `--config`, with every
//! key overridable through environment variables (`.` replaced by `_`,
//! e.g. `S3_BUCKETNAME`, `ATHENA_WORKGROUP`).

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use jaeger_athena_query::AthenaConfig;
use jaeger_athena_spanstore::S3Config;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub s3: S3Config,
    pub athena: AthenaConfig,
}

enum EnvKind {
    String,
    Bool,
}

const ENV_OVERRIDES: &[(&str, &str, &str, EnvKind)] = &[
    ("S3_BUCKETNAME", "s3", "bucket_name", EnvKind::String),
    ("S3_PREFIX", "s3", "prefix", EnvKind::String),
    ("S3_BUFFERDURATION", "s3", "buffer_duration", EnvKind::String),
    ("S3_EMPTYBUCKET", "s3", "empty_bucket", EnvKind::Bool),
    ("ATHENA_DATABASENAME", "athena", "database_name", EnvKind::String),
    ("ATHENA_SPANSTABLENAME", "athena", "spans_table_name", EnvKind::String),
    (
        "ATHENA_OPERATIONSTABLENAME",
        "athena",
        "operations_table_name",
        EnvKind::String,
    ),
    ("ATHENA_WORKGROUP", "athena", "workgroup", EnvKind::String),
    ("ATHENA_OUTPUTLOCATION", "athena", "output_location", EnvKind::String),
    ("ATHENA_MAXSPANAGE", "athena", "max_span_age", EnvKind::String),
    (
        "ATHENA_MAXTRACEDURATION",
        "athena",
        "max_trace_duration",
        EnvKind::String,
    ),
    (
        "ATHENA_DEPENDENCIESQUERYTTL",
        "athena",
        "dependencies_query_ttl",
        EnvKind::String,
    ),
    (
        "ATHENA_SERVICESQUERYTTL",
        "athena",
        "services_query_ttl",
        EnvKind::String,
    ),
    (
        "ATHENA_DEPENDENCIESPREFETCH",
        "athena",
        "dependencies_prefetch",
        EnvKind::Bool,
    ),
];

fn set_key(
    root: &mut serde_yaml::Value,
    section: &str,
    field: &str,
    value: serde_yaml::Value,
) -> Result<()> {
    let serde_yaml::Value::Mapping(map) = root else {
        bail!("configuration root must be a mapping");
    };
    let entry = map
        .entry(serde_yaml::Value::String(section.to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(Default::default()));
    let serde_yaml::Value::Mapping(section_map) = entry else {
        bail!("configuration section {section} must be a mapping");
    };
    section_map.insert(serde_yaml::Value::String(field.to_string()), value);
    Ok(())
}

fn apply_env(
    root: &mut serde_yaml::Value,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    for (env, section, field, kind) in ENV_OVERRIDES {
        let Some(raw) = lookup(env) else { continue };
        let value = match kind {
            EnvKind::String => serde_yaml::Value::String(raw),
            EnvKind::Bool => serde_yaml::Value::Bool(
                raw.parse()
                    .with_context(|| format!("{env} must be true or false, got {raw:?}"))?,
            ),
        };
        set_key(root, section, field, value)?;
    }
    Ok(())
}

impl Configuration {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut root = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => serde_yaml::Value::Mapping(Default::default()),
        };
        apply_env(&mut root, |name| std::env::var(name).ok())?;
        serde_yaml::from_value(root).with_context(|| "invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    const FULL_CONFIG: &str = "\
s3:
  bucket_name: jaeger-spans
  prefix: spans-prod/
  buffer_duration: 90s
athena:
  database_name: default
  spans_table_name: jaeger_spans
  operations_table_name: jaeger_operations
  workgroup: jaeger
  output_location: s3://jaeger-athena-results/
  max_span_age: 336h
  services_query_ttl: 10s
";

    fn load_with_env(yaml: &str, env: &[(&str, &str)]) -> Result<Configuration> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut root: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        apply_env(&mut root, |name| env.get(name).cloned())?;
        serde_yaml::from_value(root).with_context(|| "invalid configuration")
    }

    #[test]
    fn file_values_and_defaults() {
        let config = load_with_env(FULL_CONFIG, &[]).unwrap();
        assert_eq!(config.s3.bucket_name, "jaeger-spans");
        assert_eq!(config.s3.prefix, "spans-prod/");
        assert_eq!(config.s3.buffer_duration, Duration::from_secs(90));
        assert!(!config.s3.empty_bucket);
        assert_eq!(config.athena.max_span_age, Duration::from_secs(336 * 3600));
        assert_eq!(config.athena.services_query_ttl, Duration::from_secs(10));
        // untouched keys keep their defaults
        assert_eq!(
            config.athena.dependencies_query_ttl,
            Duration::from_secs(6 * 3600)
        );
        assert!(!config.athena.dependencies_prefetch);
    }

    #[test]
    fn environment_overrides_file_values() {
        let config = load_with_env(
            FULL_CONFIG,
            &[
                ("S3_BUCKETNAME", "other-bucket"),
                ("S3_EMPTYBUCKET", "true"),
                ("ATHENA_MAXSPANAGE", "24h"),
            ],
        )
        .unwrap();
        assert_eq!(config.s3.bucket_name, "other-bucket");
        assert!(config.s3.empty_bucket);
        assert_eq!(config.athena.max_span_age, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn invalid_bool_override_is_rejected() {
        let result = load_with_env(FULL_CONFIG, &[("S3_EMPTYBUCKET", "yes")]);
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_keys_are_rejected() {
        let result = load_with_env("s3:\n  bucket_name: b\n", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let result = load_with_env(FULL_CONFIG, &[("S3_BUFFERDURATION", "soon")]);
        assert!(result.is_err());
    }
}
