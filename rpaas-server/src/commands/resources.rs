//! Configuration commands: autoscale, blocks, routes, certificates, ACL
//! and extra files.

use std::path::Path;

use anyhow::{Context, Result};
use rpaas_client::RpaasClient;
use rpaas_models::{AllowedUpstream, Autoscale, DeleteRouteArgs, ExtraFile, Route, UpdateBlockArgs};

use super::print_json;
use crate::cli::{
    AclCommand, AutoscaleArgs, AutoscaleCommand, BlockCommand, CertificateCommand, ExtraFileCommand,
    RouteCommand,
};

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

// ============================================================================
// Autoscale
// ============================================================================

impl From<AutoscaleArgs> for Autoscale {
    fn from(args: AutoscaleArgs) -> Self {
        Autoscale {
            min_replicas: args.min,
            max_replicas: args.max,
            cpu: args.cpu,
            memory: args.memory,
            rps: args.rps,
        }
    }
}

fn opt(value: Option<i32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub async fn handle_autoscale(client: &RpaasClient, instance: &str, command: AutoscaleCommand) -> Result<()> {
    match command {
        AutoscaleCommand::Get { output } => {
            let policy = client.get_autoscale(instance).await?;
            if output == "json" {
                return print_json(&policy);
            }
            println!("{:<8} {:<8} {:<8} {:<8} {}", "MIN", "MAX", "CPU", "MEMORY", "RPS");
            println!("{}", "-".repeat(45));
            println!(
                "{:<8} {:<8} {:<8} {:<8} {}",
                opt(policy.min_replicas),
                opt(policy.max_replicas),
                opt(policy.cpu),
                opt(policy.memory),
                opt(policy.rps)
            );
        }
        AutoscaleCommand::Add { policy } => {
            let policy = Autoscale::from(policy);
            policy.validate()?;
            client.create_autoscale(instance, &policy).await?;
            println!("Autoscale created on {}", instance);
        }
        AutoscaleCommand::Update { policy } => {
            client.update_autoscale(instance, &Autoscale::from(policy)).await?;
            println!("Autoscale updated on {}", instance);
        }
        AutoscaleCommand::Remove => {
            client.remove_autoscale(instance).await?;
            println!("Autoscale removed from {}", instance);
        }
    }
    Ok(())
}

// ============================================================================
// Blocks and routes
// ============================================================================

pub async fn handle_blocks(client: &RpaasClient, instance: &str, command: BlockCommand) -> Result<()> {
    match command {
        BlockCommand::List { output } => {
            let blocks = client.list_blocks(instance).await?;
            if output == "json" {
                return print_json(&blocks);
            }
            for block in &blocks {
                match &block.server_name {
                    Some(server) => println!("# {} ({})", block.context, server),
                    None => println!("# {}", block.context),
                }
                println!("{}", block.content.trim_end());
                println!();
            }
            println!("{} block(s) found", blocks.len());
        }
        BlockCommand::Update {
            name,
            content,
            server_name,
            extend,
        } => {
            let args = UpdateBlockArgs {
                block_name: name,
                content: read_text(&content)?,
                server_name,
                extend,
            };
            // fail here rather than round-tripping an invalid block
            args.clone().into_block()?;
            client.update_block(instance, &args).await?;
            println!("Block {} updated on {}", args.block_name, instance);
        }
        BlockCommand::Delete { name, server_name } => {
            client
                .delete_block(instance, &name, server_name.as_deref())
                .await?;
            println!("Block {} removed from {}", name, instance);
        }
    }
    Ok(())
}

pub async fn handle_routes(client: &RpaasClient, instance: &str, command: RouteCommand) -> Result<()> {
    match command {
        RouteCommand::List { output } => {
            let routes = client.list_routes(instance).await?;
            if output == "json" {
                return print_json(&routes);
            }
            println!("{:<30} {:<20} {:<40} {}", "PATH", "SERVER", "DESTINATION", "HTTPS ONLY");
            println!("{}", "-".repeat(105));
            for route in &routes {
                println!(
                    "{:<30} {:<20} {:<40} {}",
                    route.path,
                    route.server_name.as_deref().unwrap_or("-"),
                    route.destination.as_deref().unwrap_or("(custom content)"),
                    route.https_only
                );
            }
        }
        RouteCommand::Update {
            path,
            destination,
            content,
            https_only,
            server_name,
        } => {
            let content = content.as_deref().map(read_text).transpose()?;
            let route = Route {
                path,
                server_name,
                destination,
                https_only,
                content,
            }
            .normalized();
            route.validate()?;
            client.update_route(instance, &route).await?;
            println!("Route {} updated on {}", route.path, instance);
        }
        RouteCommand::Delete { path, server_name } => {
            let args = DeleteRouteArgs { path, server_name };
            client.delete_route(instance, &args).await?;
            println!("Route {} removed from {}", args.path, instance);
        }
    }
    Ok(())
}

// ============================================================================
// Certificates and ACL
// ============================================================================

pub async fn handle_certificates(
    client: &RpaasClient,
    instance: &str,
    command: CertificateCommand,
) -> Result<()> {
    match command {
        CertificateCommand::List { output } => {
            let certificates = client.list_certificates(instance).await?;
            if output == "json" {
                return print_json(&certificates);
            }
            for cert in &certificates {
                println!("# {}", cert.name);
                println!("{}", cert.certificate.trim_end());
                println!();
            }
            println!("{} certificate(s) found", certificates.len());
        }
        CertificateCommand::Add { name, cert, key } => {
            let certificate = read_text(&cert)?;
            let key = read_text(&key)?;
            client
                .update_certificate(instance, &name, &certificate, &key)
                .await?;
            println!("Certificate {} updated on {}", display_name(&name), instance);
        }
        CertificateCommand::Delete { name } => {
            client.delete_certificate(instance, &name).await?;
            println!("Certificate {} removed from {}", display_name(&name), instance);
        }
    }
    Ok(())
}

fn display_name(name: &str) -> &str {
    rpaas_models::certificate::certificate_name_or_default(name)
}

pub async fn handle_acl(client: &RpaasClient, instance: &str, command: AclCommand) -> Result<()> {
    match command {
        AclCommand::List { output } => {
            let upstreams = client.list_acl(instance).await?;
            if output == "json" {
                return print_json(&upstreams);
            }
            println!("{:<40} {}", "HOST", "PORT");
            println!("{}", "-".repeat(50));
            for upstream in &upstreams {
                println!("{:<40} {}", upstream.host, opt(upstream.port));
            }
        }
        AclCommand::Add { host, port } => {
            let upstream = AllowedUpstream { host, port }.normalized();
            upstream.validate()?;
            client.add_acl(instance, &upstream).await?;
            println!("Upstream {} allowed on {}", upstream.host, instance);
        }
        AclCommand::Remove { host, port } => {
            let upstream = AllowedUpstream { host, port }.normalized();
            client.remove_acl(instance, &upstream).await?;
            println!("Upstream {} revoked on {}", upstream.host, instance);
        }
    }
    Ok(())
}

// ============================================================================
// Extra files
// ============================================================================

/// Loads local files, each stored under its own file name.
pub fn load_files(paths: &[impl AsRef<Path>]) -> Result<Vec<ExtraFile>> {
    paths
        .iter()
        .map(|path| {
            let path = path.as_ref();
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", path.display()))?
                .to_string();
            let content =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(ExtraFile { name, content })
        })
        .collect()
}

pub async fn handle_extra_files(
    client: &RpaasClient,
    instance: &str,
    command: ExtraFileCommand,
) -> Result<()> {
    match command {
        ExtraFileCommand::List { output } => {
            let names = client.list_extra_files(instance).await?;
            if output == "json" {
                return print_json(&names);
            }
            for name in &names {
                println!("{}", name);
            }
            println!();
            println!("{} file(s) found", names.len());
        }
        ExtraFileCommand::Get { name } => {
            let file = client.get_extra_file(instance, &name).await?;
            use std::io::Write;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&file.content)?;
            stdout.flush()?;
        }
        ExtraFileCommand::Add { files } => {
            let files = load_files(&files)?;
            client.add_extra_files(instance, &files).await?;
            println!("{} file(s) added to {}", files.len(), instance);
        }
        ExtraFileCommand::Update { files } => {
            let files = load_files(&files)?;
            client.update_extra_files(instance, &files).await?;
            println!("{} file(s) updated on {}", files.len(), instance);
        }
        ExtraFileCommand::Delete { names } => {
            for name in &names {
                client.delete_extra_file(instance, name).await?;
                println!("File {} removed from {}", name, instance);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autoscale_flags_map_onto_the_policy() {
        let policy = Autoscale::from(AutoscaleArgs {
            min: Some(2),
            max: Some(10),
            cpu: Some(70),
            ..Default::default()
        });
        assert_eq!(policy.min_replicas, Some(2));
        assert_eq!(policy.max_replicas, Some(10));
        assert_eq!(policy.cpu, Some(70));
        assert_eq!(policy.rps, None);
    }

    #[test]
    fn local_files_keep_only_their_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.html");
        std::fs::write(&path, "<h1>hi</h1>").unwrap();

        let files = load_files(&[path]).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "index.html");
        assert_eq!(files[0].content, b"<h1>hi</h1>");
    }

    #[test]
    fn missing_local_files_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_files(&[dir.path().join("nope.conf")]).is_err());
    }
}
