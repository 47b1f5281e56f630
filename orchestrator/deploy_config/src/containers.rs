//! Container list loading.
//!
//! `containers.yml` holds an ordered `containers:` list. Each entry has a
//! `name` and the recognized runtime options; any other key is rejected.
//!
//! ```yaml
//! containers:
//!   - name: squid
//!     image: stackhpc/squid:3.5.20-1
//!     ports: ["3128:3128"]
//!     volumes: ["/etc/squid:/etc/squid:ro"]
//!     pre: hooks/squid-pre.yml
//! ```
//!
//! Relative hook paths are resolved against the directory of the file.
//! Every problem in the file is collected and reported in one
//! [`ConfigError::Validation`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use converge_types::{
    ComparedField, ContainerSpec, ContainerSpecList, PortMapping, RestartPolicy, RuntimeOptions,
    Ulimit,
};

use crate::error::{ConfigError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainersFile {
    #[serde(default)]
    containers: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandValue {
    Line(String),
    Args(Vec<String>),
}

impl CommandValue {
    /// Argument vector. A string is split with shell quoting rules.
    fn into_args(self) -> std::result::Result<Vec<String>, String> {
        match self {
            CommandValue::Line(line) => shlex::split(&line)
                .ok_or_else(|| format!("command '{}' has unbalanced quotes", line)),
            CommandValue::Args(args) => Ok(args),
        }
    }
}

/// YAML scalar accepted where a string is expected (`TZ: UTC`, `shmmax: 4096`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

fn stringify(map: BTreeMap<String, Scalar>) -> BTreeMap<String, String> {
    map.into_iter().map(|(k, v)| (k, v.to_string())).collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainerEntry {
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    command: Option<CommandValue>,
    #[serde(default)]
    env: BTreeMap<String, Scalar>,
    #[serde(default)]
    network_mode: Option<String>,
    #[serde(default)]
    ports: Vec<String>,
    #[serde(default)]
    volumes: Vec<String>,
    #[serde(default)]
    capabilities: Vec<String>,
    #[serde(default)]
    privileged: bool,
    #[serde(default)]
    restart_policy: Option<RestartPolicy>,
    #[serde(default)]
    shm_size: Option<String>,
    #[serde(default)]
    sysctls: BTreeMap<String, Scalar>,
    #[serde(default)]
    ulimits: BTreeMap<String, Ulimit>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    pid_mode: Option<String>,
    #[serde(default)]
    ipc_mode: Option<String>,
    #[serde(default)]
    init: Option<bool>,
    #[serde(default)]
    detach: Option<bool>,
    #[serde(default)]
    comparisons: Option<Vec<String>>,
    #[serde(default)]
    pre: Option<PathBuf>,
    #[serde(default)]
    post: Option<PathBuf>,
}

/// Parse a port declaration: `CONTAINER` or `HOST:CONTAINER`, optionally
/// suffixed with `/tcp` or `/udp`.
pub fn parse_port(value: &str) -> std::result::Result<PortMapping, String> {
    let value = value.trim();
    let (ports, protocol) = match value.rsplit_once('/') {
        Some((ports, proto)) => (ports, proto.to_ascii_lowercase()),
        None => (value, "tcp".to_string()),
    };
    if protocol != "tcp" && protocol != "udp" {
        return Err(format!("port '{}': protocol must be tcp or udp", value));
    }

    let number = |s: &str| {
        s.parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| format!("port '{}': '{}' is not a valid port number", value, s))
    };

    let (host_port, container_port) = match ports.split_once(':') {
        Some((host, container)) => (Some(number(host)?), number(container)?),
        None => (None, number(ports)?),
    };

    Ok(PortMapping {
        container_port,
        host_port,
        protocol,
    })
}

fn resolve(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        base_dir.join(path)
    } else {
        path
    }
}

impl ContainerEntry {
    /// Build a spec, appending any problems to `errors`.
    fn into_spec(self, base_dir: &Path, errors: &mut Vec<String>) -> Option<ContainerSpec> {
        let name = self.name.trim().to_string();
        let label = if name.is_empty() { "<unnamed>".to_string() } else { name.clone() };
        let before = errors.len();

        if name.is_empty() {
            errors.push("container name must not be empty".to_string());
        }
        let image = match self.image.as_deref().map(str::trim) {
            Some(image) if !image.is_empty() => image.to_string(),
            _ => {
                errors.push(format!("container '{}': image is required", label));
                String::new()
            }
        };

        let mut ports = BTreeSet::new();
        for port in &self.ports {
            match parse_port(port) {
                Ok(mapping) => {
                    ports.insert(mapping);
                }
                Err(e) => errors.push(format!("container '{}': {}", label, e)),
            }
        }

        let comparisons = self.comparisons.map(|names| {
            let mut seen = HashSet::new();
            let mut fields = Vec::new();
            for field in names {
                match field.parse::<ComparedField>() {
                    Ok(parsed) if seen.insert(parsed) => fields.push(parsed),
                    Ok(_) => errors.push(format!(
                        "container '{}': comparison '{}' listed twice",
                        label, field
                    )),
                    Err(e) => errors.push(format!("container '{}': {}", label, e)),
                }
            }
            fields
        });

        let command = match self.command.map(CommandValue::into_args) {
            Some(Ok(args)) => Some(args),
            Some(Err(e)) => {
                errors.push(format!("container '{}': {}", label, e));
                None
            }
            None => None,
        };

        let options = RuntimeOptions {
            command,
            env: stringify(self.env),
            network_mode: self.network_mode,
            ports,
            volumes: self.volumes.into_iter().collect(),
            capabilities: self.capabilities.into_iter().collect(),
            privileged: self.privileged,
            restart_policy: self.restart_policy,
            shm_size: self.shm_size,
            sysctls: stringify(self.sysctls),
            ulimits: self.ulimits,
            user: self.user,
            pid_mode: self.pid_mode,
            ipc_mode: self.ipc_mode,
            init: self.init,
            detach: self.detach.unwrap_or(true),
        };

        let mut spec = ContainerSpec::new(name, image).with_options(options);
        spec.tag = self.tag;
        spec.pre = self.pre.map(|p| resolve(base_dir, p));
        spec.post = self.post.map(|p| resolve(base_dir, p));
        spec.comparisons = comparisons;

        if errors.len() > before {
            return None;
        }
        // Image reference and tag grammar
        if let Err(e) = spec.validate() {
            errors.push(e.to_string());
            return None;
        }
        Some(spec)
    }
}

/// Parse a container list document. Relative hook paths resolve against `base_dir`.
pub fn parse_containers(content: &str, base_dir: &Path) -> Result<ContainerSpecList> {
    let file: ContainersFile = serde_yaml_ng::from_str(content)?;

    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(file.containers.len());

    for entry in file.containers {
        let name = entry.name.trim().to_string();
        if !name.is_empty() && !seen.insert(name.clone()) {
            errors.push(format!("duplicate container name '{}'", name));
        }
        if let Some(spec) = entry.into_spec(base_dir, &mut errors) {
            specs.push(spec);
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }

    debug!(containers = specs.len(), "Parsed container list");
    ContainerSpecList::new(specs).map_err(|e| ConfigError::validation(e.to_string()))
}

/// Load the container list from a file.
pub async fn load_containers(path: impl AsRef<Path>) -> Result<ContainerSpecList> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = tokio::fs::read_to_string(path).await?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_containers(&content, base_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SQUID: &str = r#"
containers:
  - name: squid
    image: stackhpc/squid:3.5.20-1
    command: squid -N -d1
    env:
      TZ: UTC
      SQUID_CACHE_MB: 512
    ports: ["3128:3128", "3130/udp"]
    volumes: ["/etc/squid:/etc/squid:ro"]
    capabilities: [NET_ADMIN]
    restart_policy: unless-stopped
    ulimits:
      nofile: { soft: 65536, hard: 65536 }
    sysctls:
      net.ipv4.ip_forward: 1
    comparisons: [image, env, privileged]
    pre: hooks/pre.yml
    post: /opt/hooks/post.yml
  - name: nginx
    image: nginx
    tag: "1.25"
"#;

    #[test]
    fn test_parse_full_entry() {
        let specs = parse_containers(SQUID, Path::new("/etc/converge")).unwrap();
        assert_eq!(specs.len(), 2);

        let squid = specs.get("squid").unwrap();
        assert_eq!(
            squid.options.command,
            Some(vec!["squid".to_string(), "-N".to_string(), "-d1".to_string()])
        );
        assert_eq!(squid.options.env.get("SQUID_CACHE_MB").unwrap(), "512");
        assert!(squid.options.ports.contains(&PortMapping::tcp(3128, Some(3128))));
        assert!(squid.options.ports.contains(&PortMapping {
            container_port: 3130,
            host_port: None,
            protocol: "udp".into()
        }));
        assert_eq!(squid.options.restart_policy, Some(RestartPolicy::UnlessStopped));
        assert_eq!(squid.options.ulimits["nofile"].soft, 65536);
        assert_eq!(squid.options.sysctls["net.ipv4.ip_forward"], "1");
        assert_eq!(
            squid.compared_fields(),
            &[ComparedField::Image, ComparedField::Env, ComparedField::Privileged]
        );
        assert_eq!(squid.pre, Some(PathBuf::from("/etc/converge/hooks/pre.yml")));
        assert_eq!(squid.post, Some(PathBuf::from("/opt/hooks/post.yml")));
        assert!(squid.options.detach);

        let nginx = specs.get("nginx").unwrap();
        assert_eq!(nginx.effective_image().unwrap(), "nginx:1.25");
    }

    #[test]
    fn test_declared_order_is_kept() {
        let specs = parse_containers(SQUID, Path::new(".")).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["squid", "nginx"]);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let yaml = "containers:\n  - name: squid\n    image: squid\n    colour: blue\n";
        let err = parse_containers(yaml, Path::new(".")).unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse(_)));
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_all_problems_are_reported_together() {
        let yaml = r#"
containers:
  - name: a
  - name: b
    image: nginx
    ports: ["http"]
    comparisons: [image, image, colour]
  - name: b
    image: nginx
"#;
        let err = parse_containers(yaml, Path::new(".")).unwrap_err();
        let ConfigError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 5);
        assert!(problems.iter().any(|p| p.contains("'a': image is required")));
        assert!(problems.iter().any(|p| p.contains("not a valid port")));
        assert!(problems.iter().any(|p| p.contains("listed twice")));
        assert!(problems.iter().any(|p| p.contains("colour")));
        assert!(problems.iter().any(|p| p.contains("duplicate container name 'b'")));
    }

    #[test]
    fn test_command_string_keeps_quoted_arguments() {
        let yaml = r#"
containers:
  - name: worker
    image: busybox
    command: "sh -c 'sleep 10 && echo hi'"
"#;
        let specs = parse_containers(yaml, Path::new(".")).unwrap();
        assert_eq!(
            specs.get("worker").unwrap().options.command,
            Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 10 && echo hi".to_string()
            ])
        );
    }

    #[test]
    fn test_command_with_unbalanced_quotes_is_rejected() {
        let yaml = "containers:\n  - name: worker\n    image: busybox\n    command: \"sh -c 'sleep 10\"\n";
        let err = parse_containers(yaml, Path::new(".")).unwrap_err();
        let ConfigError::Validation(problems) = err else {
            panic!("expected validation error");
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'worker'"));
        assert!(problems[0].contains("unbalanced quotes"));
    }

    #[test]
    fn test_bad_tag_is_rejected() {
        let yaml = "containers:\n  - name: squid\n    image: squid\n    tag: 'not a tag'\n";
        let err = parse_containers(yaml, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("squid"));
    }

    #[test]
    fn test_parse_port_forms() {
        assert_eq!(parse_port("80").unwrap(), PortMapping::tcp(80, None));
        assert_eq!(parse_port("8080:80/TCP").unwrap(), PortMapping::tcp(80, Some(8080)));
        assert!(parse_port("80/sctp").is_err());
        assert!(parse_port("0").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("containers.yml");
        tokio::fs::write(&path, SQUID).await.unwrap();

        let specs = load_containers(&path).await.unwrap();
        assert_eq!(
            specs.get("squid").unwrap().pre,
            Some(temp.path().join("hooks/pre.yml"))
        );

        let missing = load_containers(temp.path().join("absent.yml")).await;
        assert!(matches!(missing, Err(ConfigError::NotFound(_))));
    }
}
