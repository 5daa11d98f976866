//! `docker run` command parser.

use std::collections::BTreeMap;

use crate::launch::{LaunchError, LaunchSpec};

/// Container port assumed when the command does not publish or expose one.
pub const DEFAULT_CONTAINER_PORT: u16 = 8000;

/// Flags that consume the following token as their argument.
const VALUE_FLAGS: &[&str] = &[
    "-e",
    "--env",
    "-p",
    "--publish",
    "--expose",
    "-v",
    "--volume",
    "--mount",
    "--name",
    "--network",
    "--net",
    "-w",
    "--workdir",
    "--entrypoint",
    "-u",
    "--user",
    "--env-file",
    "-l",
    "--label",
    "--platform",
    "--pull",
    "--restart",
    "-m",
    "--memory",
    "--cpus",
    "-h",
    "--hostname",
    "--add-host",
    "--device",
    "--cap-add",
    "--cap-drop",
    "--dns",
    "--log-driver",
    "--log-opt",
    "--shm-size",
    "--ulimit",
    "--gpus",
    "--ipc",
    "--pid",
    "--tmpfs",
    "--security-opt",
    "--stop-signal",
    "--stop-timeout",
    "--health-cmd",
    "--health-interval",
    "--user-data",
];

/// Parse a container-run command using [`DEFAULT_CONTAINER_PORT`].
pub fn parse(command: &str) -> Result<LaunchSpec, LaunchError> {
    parse_with_default_port(command, DEFAULT_CONTAINER_PORT)
}

/// Parse a container-run command, falling back to `default_port` when the
/// command declares none.
pub fn parse_with_default_port(command: &str, default_port: u16) -> Result<LaunchSpec, LaunchError> {
    let tokens = tokenize(command)?;
    let rest = strip_run_prefix(&tokens)?;

    let mut env = BTreeMap::new();
    let mut port: Option<u16> = None;
    let mut image: Option<String> = None;
    let mut args = Vec::new();

    let mut i = 0;
    while i < rest.len() {
        let token = rest[i].as_str();

        if image.is_some() {
            args.push(token.to_string());
            i += 1;
            continue;
        }

        if token == "--" {
            i += 1;
            continue;
        }

        if !token.starts_with('-') {
            image = Some(token.to_string());
            i += 1;
            continue;
        }

        // `--flag=value`
        let (flag, inline_value) = match token.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (token, None),
        };

        if !VALUE_FLAGS.contains(&flag) {
            // Boolean flags such as `-it`, `--rm`, `-d`.
            i += 1;
            continue;
        }

        let value = match inline_value {
            Some(v) => {
                i += 1;
                v
            }
            None => {
                let v = rest.get(i + 1).ok_or_else(|| LaunchError::MalformedCommand {
                    reason: format!("flag '{flag}' is missing its argument"),
                })?;
                i += 2;
                v.clone()
            }
        };

        match flag {
            "-e" | "--env" => {
                // `-e NAME` without a value inherits from the host, which a
                // cluster workload cannot do.
                if let Some((key, val)) = value.split_once('=') {
                    if key.is_empty() {
                        return Err(LaunchError::MalformedCommand {
                            reason: format!("environment entry '{value}' has an empty name"),
                        });
                    }
                    env.insert(key.to_string(), val.to_string());
                } else {
                    tracing::debug!(name = %value, "Ignoring host-inherited environment entry");
                }
            }
            "-p" | "--publish" | "--expose" if port.is_none() => {
                port = Some(container_port(&value)?);
            }
            _ => {}
        }
    }

    let image = image.ok_or(LaunchError::ImageNotFound)?;

    Ok(LaunchSpec {
        image,
        env,
        port: port.unwrap_or(default_port),
        args,
    })
}

/// Accept `docker run`, `docker container run` and `podman run`.
fn strip_run_prefix(tokens: &[String]) -> Result<&[String], LaunchError> {
    let words: Vec<&str> = tokens.iter().take(3).map(String::as_str).collect();
    let skip = match words.as_slice() {
        ["docker" | "podman", "run", ..] => 2,
        ["docker" | "podman", "container", "run"] => 3,
        _ => {
            return Err(LaunchError::MalformedCommand {
                reason: "command must start with 'docker run'".to_string(),
            });
        }
    };
    Ok(&tokens[skip..])
}

/// Extract the container side of a `-p`/`--expose` value.
///
/// Accepts `3000`, `8080:3000`, `127.0.0.1:8080:3000` and a `/tcp` suffix.
fn container_port(value: &str) -> Result<u16, LaunchError> {
    let without_proto = value.split('/').next().unwrap_or(value);
    let container = without_proto.rsplit(':').next().unwrap_or(without_proto);
    match container.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(LaunchError::InvalidPort {
            value: value.to_string(),
        }),
    }
}

/// Split a command line into words, honouring single quotes, double quotes
/// and backslash escapes.
fn tokenize(command: &str) -> Result<Vec<String>, LaunchError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars();

    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        match (&quote, c) {
            (Quote::None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (Quote::None, '\'') => {
                quote = Quote::Single;
                in_token = true;
            }
            (Quote::None, '"') => {
                quote = Quote::Double;
                in_token = true;
            }
            (Quote::None, '\\') => match chars.next() {
                // Line continuation.
                Some('\n') => {}
                Some(next) => {
                    current.push(next);
                    in_token = true;
                }
                None => {
                    return Err(LaunchError::MalformedCommand {
                        reason: "trailing backslash".to_string(),
                    });
                }
            },
            (Quote::Single, '\'') | (Quote::Double, '"') => quote = Quote::None,
            (Quote::Double, '\\') => match chars.next() {
                Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => {
                    return Err(LaunchError::MalformedCommand {
                        reason: "unterminated double quote".to_string(),
                    });
                }
            },
            (_, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    match quote {
        Quote::None => {}
        Quote::Single => {
            return Err(LaunchError::MalformedCommand {
                reason: "unterminated single quote".to_string(),
            });
        }
        Quote::Double => {
            return Err(LaunchError::MalformedCommand {
                reason: "unterminated double quote".to_string(),
            });
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
