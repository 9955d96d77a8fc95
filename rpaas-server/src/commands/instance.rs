use anyhow::Result;
use rpaas_client::RpaasClient;
use rpaas_models::info::AddressType;
use rpaas_models::{InstanceInfo, Metadata, MetadataItem};

use super::{key_value, or_dash, print_json};
use crate::cli::MetadataCommand;

pub async fn run_info(client: &RpaasClient, instance: &str, output: &str) -> Result<()> {
    let info = client.info(instance).await?;
    if output == "json" {
        return print_json(&info);
    }
    print_info(&info);
    Ok(())
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn human_age(seconds: Option<i64>) -> String {
    match seconds {
        None => "-".to_string(),
        Some(s) if s < 60 => format!("{}s", s),
        Some(s) if s < 3600 => format!("{}m", s / 60),
        Some(s) if s < 86400 => format!("{}h", s / 3600),
        Some(s) => format!("{}d", s / 86400),
    }
}

fn print_info(info: &InstanceInfo) {
    println!("Instance: {}", info.name);
    println!("{}", "=".repeat(60));
    println!();
    println!("  Service:            {}", info.service.as_deref().unwrap_or("-"));
    println!("  Cluster:            {}", info.cluster.as_deref().unwrap_or("-"));
    println!("  Team:               {}", or_dash(&info.team));
    println!("  Description:        {}", or_dash(&info.description));
    println!("  Plan:               {}", or_dash(&info.plan));
    println!("  Flavors:            {}", join_or_dash(&info.flavors));
    println!("  Tags:               {}", join_or_dash(&info.tags));
    println!(
        "  Replicas:           {}",
        info.replicas.map(|r| r.to_string()).unwrap_or_else(|| "-".into())
    );
    if info.shutdown {
        println!("  State:              stopped");
    }

    if let Some(policy) = &info.autoscale {
        println!();
        println!("Autoscale:");
        println!(
            "  Replicas:           {} - {}",
            policy.min_replicas.unwrap_or(1),
            policy.max_replicas.map(|m| m.to_string()).unwrap_or_else(|| "-".into())
        );
        if let Some(cpu) = policy.cpu {
            println!("  CPU target:         {}%", cpu);
        }
        if let Some(memory) = policy.memory {
            println!("  Memory target:      {}%", memory);
        }
        if let Some(rps) = policy.rps {
            println!("  RPS target:         {}", rps);
        }
    }

    if !info.addresses.is_empty() {
        println!();
        println!("Addresses:");
        for address in &info.addresses {
            let kind = match address.address_type {
                AddressType::ClusterExternal => "external",
                AddressType::ClusterInternal => "internal",
            };
            println!(
                "  {:<10} {:<40} {:<16} {}",
                kind,
                address.hostname.as_deref().unwrap_or("-"),
                address.ip.as_deref().unwrap_or("-"),
                or_dash(&address.status)
            );
        }
    }

    if !info.pods.is_empty() {
        let now = chrono::Utc::now();
        println!();
        println!("{:<40} {:<16} {:<8} {:<10} {:<9} {}", "POD", "IP", "READY", "STATUS", "RESTARTS", "AGE");
        println!("{}", "-".repeat(95));
        for pod in &info.pods {
            println!(
                "{:<40} {:<16} {:<8} {:<10} {:<9} {}",
                pod.name,
                or_dash(&pod.ip),
                if pod.ready { "yes" } else { "no" },
                or_dash(&pod.status),
                pod.restarts,
                human_age(pod.age_seconds(now))
            );
            for error in &pod.errors {
                println!("    ! {} (x{})", error.message, error.count);
            }
        }
    }

    if !info.certificates.is_empty() {
        println!();
        println!("Certificates:");
        for cert in &info.certificates {
            println!("  {:<20} {}", cert.name, cert.secret_name);
        }
    }

    if !info.blocks.is_empty() {
        println!();
        println!("Blocks:");
        for block in &info.blocks {
            println!("  {:<12} {} bytes", block.context.as_str(), block.content.len());
        }
    }

    if !info.routes.is_empty() {
        println!();
        println!("Routes:");
        for route in &info.routes {
            println!(
                "  {:<30} {}",
                route.path,
                route.destination.as_deref().unwrap_or("(custom content)")
            );
        }
    }

    if !info.binds.is_empty() {
        println!();
        println!("Binds:");
        for bind in &info.binds {
            println!("  {:<20} {}", bind.name, bind.host);
        }
    }

    if !info.acls.is_empty() {
        println!();
        println!("ACL:");
        for upstream in &info.acls {
            match upstream.port {
                Some(port) => println!("  {}:{}", upstream.host, port),
                None => println!("  {}", upstream.host),
            }
        }
    }

    if !info.events.is_empty() {
        println!();
        println!("{:<10} {:<20} {}", "TYPE", "REASON", "MESSAGE");
        println!("{}", "-".repeat(85));
        for event in &info.events {
            println!("{:<10} {:<20} {}", event.event_type, event.reason, event.message);
        }
    }
}

pub async fn run_scale(client: &RpaasClient, instance: &str, quantity: i32) -> Result<()> {
    client.scale(instance, quantity).await?;
    println!("Instance {} scaled to {} replica(s)", instance, quantity);
    Ok(())
}

pub async fn run_start(client: &RpaasClient, instance: &str) -> Result<()> {
    client.start(instance).await?;
    println!("Instance {} started", instance);
    Ok(())
}

pub async fn run_stop(client: &RpaasClient, instance: &str) -> Result<()> {
    client.stop(instance).await?;
    println!("Instance {} stopped", instance);
    Ok(())
}

pub async fn run_restart(client: &RpaasClient, instance: &str) -> Result<()> {
    client.restart(instance).await?;
    println!("Instance {} restarting", instance);
    Ok(())
}

// ============================================================================
// Metadata
// ============================================================================

fn items(raw: &[String], with_values: bool) -> Result<Vec<MetadataItem>> {
    raw.iter()
        .map(|entry| {
            if with_values {
                let (name, value) = key_value(entry)?;
                Ok(MetadataItem { name, value })
            } else {
                Ok(MetadataItem {
                    name: entry.clone(),
                    value: String::new(),
                })
            }
        })
        .collect()
}

pub fn metadata_from(labels: &[String], annotations: &[String], with_values: bool) -> Result<Metadata> {
    let metadata = Metadata {
        labels: items(labels, with_values)?,
        annotations: items(annotations, with_values)?,
    };
    if metadata.is_empty() {
        anyhow::bail!("at least one --label or --annotation is required");
    }
    Ok(metadata)
}

pub async fn handle_metadata(client: &RpaasClient, instance: &str, command: MetadataCommand) -> Result<()> {
    match command {
        MetadataCommand::Get { output } => {
            let metadata = client.get_metadata(instance).await?;
            if output == "json" {
                return print_json(&metadata);
            }
            println!("{:<12} {:<40} {}", "KIND", "NAME", "VALUE");
            println!("{}", "-".repeat(85));
            for item in &metadata.labels {
                println!("{:<12} {:<40} {}", "label", item.name, item.value);
            }
            for item in &metadata.annotations {
                println!("{:<12} {:<40} {}", "annotation", item.name, item.value);
            }
        }
        MetadataCommand::Set { labels, annotations } => {
            let metadata = metadata_from(&labels, &annotations, true)?;
            client.set_metadata(instance, &metadata).await?;
            println!("Metadata updated on {}", instance);
        }
        MetadataCommand::Unset { labels, annotations } => {
            let metadata = metadata_from(&labels, &annotations, false)?;
            client.unset_metadata(instance, &metadata).await?;
            println!("Metadata removed from {}", instance);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_set_needs_values() {
        let metadata = metadata_from(&["team=web".into()], &[], true).unwrap();
        assert_eq!(metadata.labels[0].name, "team");
        assert_eq!(metadata.labels[0].value, "web");
        assert!(metadata_from(&["team".into()], &[], true).is_err());
    }

    #[test]
    fn metadata_unset_takes_bare_keys() {
        let metadata = metadata_from(&[], &["owner".into()], false).unwrap();
        assert_eq!(metadata.annotations[0].name, "owner");
        assert!(metadata_from(&[], &[], false).is_err());
    }

    #[test]
    fn ages_are_compact() {
        assert_eq!(human_age(Some(42)), "42s");
        assert_eq!(human_age(Some(3 * 3600)), "3h");
        assert_eq!(human_age(Some(2 * 86400 + 5)), "2d");
        assert_eq!(human_age(None), "-");
    }
}
