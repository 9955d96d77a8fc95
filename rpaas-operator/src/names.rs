//! Label keys, annotation keys and object names shared with the operator
//!
//! The operator reconciles these objects; the names have to match what it
//! expects byte for byte.

/// Labels set on every object owned by an instance
pub mod labels {
    /// Selects the data plane pods of an instance
    pub const INSTANCE_NAME: &str = "rpaas.extensions.tsuru.io/instance-name";
    pub const SERVICE_NAME: &str = "rpaas.extensions.tsuru.io/service-name";
    pub const TEAM_OWNER: &str = "rpaas.extensions.tsuru.io/team-owner";
    pub const PLAN_NAME: &str = "rpaas.extensions.tsuru.io/plan-name";
    /// Marks pods that belong to the nginx data plane
    pub const NGINX_APP: &str = "nginx.tsuru.io/app";
}

pub mod annotations {
    pub const DESCRIPTION: &str = "rpaas.extensions.tsuru.io/description";
    pub const TAGS: &str = "rpaas.extensions.tsuru.io/tags";
    pub const RESTARTED_AT: &str = "rpaas.extensions.tsuru.io/restarted-at";
    pub const CERTIFICATE_NAME: &str = "rpaas.extensions.tsuru.io/certificate-name";
    pub const EXTRA_FILE_PREFIX: &str = "rpaas.extensions.tsuru.io/file-";
}

/// Main container of every data plane pod
pub const NGINX_CONTAINER: &str = "nginx";

pub fn instance_selector(instance: &str) -> String {
    format!("{}={}", labels::INSTANCE_NAME, instance)
}

pub fn certificate_secret(instance: &str, cert_name: &str) -> String {
    format!("{}-certs-{}", instance, cert_name)
}

pub fn extra_files_config_map(instance: &str) -> String {
    format!("{}-extra-files", instance)
}

pub fn instance_service(instance: &str) -> String {
    format!("{}-service", instance)
}

/// ConfigMap keys cannot contain `/`, so nested file names are flattened.
pub fn extra_file_key(file_name: &str) -> String {
    file_name.replace('/', "_")
}
