//! Operator CLI commands
//!
//! Thin wrappers over `rpaas-client`: build the client from the global
//! flags, make one call, print the result as a table or JSON.

use std::process::ExitCode;

use anyhow::{Context, Result};
use rpaas_client::{Addressing, Credentials, RpaasClient};
use serde::Serialize;

use crate::cli::{Mode, TargetArgs};

pub mod exec;
pub mod instance;
pub mod purge;
pub mod resources;

/// Builds a client from the global flags. `--url` means direct access;
/// otherwise requests go through Tsuru (`TSURU_TARGET`, `TSURU_TOKEN`).
pub fn client(target: &TargetArgs) -> Result<RpaasClient> {
    let addressing = match &target.url {
        Some(url) => {
            let credentials = target.user.clone().map(|username| Credentials {
                username,
                password: target.password.clone().unwrap_or_default(),
            });
            Addressing::direct(url, credentials)?
        }
        None => {
            let service = target
                .service
                .clone()
                .context("either --url or --service is required")?;
            Addressing::tsuru_from_env(service)?
        }
    };
    let client = RpaasClient::new(addressing)?;
    Ok(match &target.cluster {
        Some(cluster) => client.with_cluster(cluster.clone()),
        None => client,
    })
}

pub fn instance_name(target: &TargetArgs) -> Result<&str> {
    target
        .instance
        .as_deref()
        .filter(|i| !i.is_empty())
        .context("--instance is required")
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Splits `key=value`.
pub fn key_value(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected key=value, got {:?}", raw))?;
    if key.trim().is_empty() {
        anyhow::bail!("empty key in {:?}", raw);
    }
    Ok((key.trim().to_string(), value.to_string()))
}

/// Runs every mode except `serve`.
pub async fn run(target: TargetArgs, mode: Mode) -> Result<ExitCode> {
    let client = client(&target)?;
    let name = instance_name(&target)?;

    match mode {
        Mode::Serve => anyhow::bail!("serve is not a client command"),
        Mode::Info { output } => instance::run_info(&client, name, &output).await?,
        Mode::Scale { quantity } => instance::run_scale(&client, name, quantity).await?,
        Mode::Start => instance::run_start(&client, name).await?,
        Mode::Stop => instance::run_stop(&client, name).await?,
        Mode::Restart => instance::run_restart(&client, name).await?,
        Mode::Metadata { command } => instance::handle_metadata(&client, name, command).await?,
        Mode::Autoscale { command } => resources::handle_autoscale(&client, name, command).await?,
        Mode::Blocks { command } => resources::handle_blocks(&client, name, command).await?,
        Mode::Routes { command } => resources::handle_routes(&client, name, command).await?,
        Mode::Certificates { command } => {
            resources::handle_certificates(&client, name, command).await?
        }
        Mode::Acl { command } => resources::handle_acl(&client, name, command).await?,
        Mode::ExtraFiles { command } => resources::handle_extra_files(&client, name, command).await?,
        Mode::Purge {
            path,
            preserve_path,
            headers,
            file,
        } => return purge::run_purge(&client, name, path, preserve_path, headers, file).await,
        Mode::Exec { session, command } => {
            return exec::run_exec(&client, name, session, command).await
        }
        Mode::Shell { session } => return exec::run_shell(&client, name, session).await,
        Mode::Debug {
            session,
            image,
            command,
        } => return exec::run_debug(&client, name, session, image, command).await,
        Mode::Logs {
            pod,
            container,
            lines,
            since,
            follow,
            timestamp,
        } => {
            let options = rpaas_models::LogOptions {
                pod,
                container,
                lines,
                since,
                follow,
                timestamp,
            };
            exec::run_logs(&client, name, options).await?
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_access_needs_no_tsuru() {
        let target = TargetArgs {
            url: Some("http://127.0.0.1:9999".into()),
            user: Some("admin".into()),
            password: Some("secret".into()),
            instance: Some("my-nginx".into()),
            ..Default::default()
        };
        let client = client(&target).unwrap();
        assert!(matches!(client.addressing(), Addressing::Direct { credentials: Some(_), .. }));
        assert_eq!(instance_name(&target).unwrap(), "my-nginx");
    }

    #[test]
    fn missing_instance_is_reported() {
        let target = TargetArgs::default();
        assert!(instance_name(&target).is_err());
    }

    #[test]
    fn key_values_split_on_the_first_equals() {
        assert_eq!(
            key_value("app=my=app").unwrap(),
            ("app".to_string(), "my=app".to_string())
        );
        assert!(key_value("novalue").is_err());
        assert!(key_value("=x").is_err());
    }
}
