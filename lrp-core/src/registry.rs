//! Private registry pull secrets
use crate::descriptor::PrivateRegistry;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use k8s_openapi::{api::core::v1::Secret, apimachinery::pkg::apis::meta::v1::ObjectMeta};
use serde::Serialize;
use std::collections::BTreeMap;

/// Secret type the kubelet reads image pull credentials from
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
/// Key holding the docker config inside the secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Serialize)]
struct DockerConfig<'a> {
    auths: BTreeMap<&'a str, DockerAuth<'a>>,
}

#[derive(Serialize)]
struct DockerAuth<'a> {
    username: &'a str,
    password: &'a str,
    auth: String,
}

/// Render registry credentials as a `.dockerconfigjson` document
pub fn docker_config_json(registry: &PrivateRegistry) -> Result<String, serde_json::Error> {
    let auth = STANDARD.encode(format!("{}:{}", registry.username, registry.password));
    let config = DockerConfig {
        auths: BTreeMap::from([(
            registry.server.as_str(),
            DockerAuth {
                username: &registry.username,
                password: &registry.password,
                auth,
            },
        )]),
    };
    serde_json::to_string(&config)
}

/// How the registry secret gets its name
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretName {
    /// A fixed name, derivable from the owning object's name
    Fixed(String),
    /// A `generateName` prefix, the API server picks the rest
    Generated(String),
}

/// Build an unowned pull secret for `registry`
///
/// The secret is adopted by the workload object once that exists, see the
/// desirer in `lrp-runtime`.
pub fn registry_secret(name: SecretName, registry: &PrivateRegistry) -> Result<Secret, serde_json::Error> {
    let (name, generate_name) = match name {
        SecretName::Fixed(name) => (Some(name), None),
        SecretName::Generated(prefix) => (None, Some(prefix)),
    };
    Ok(Secret {
        metadata: ObjectMeta {
            name,
            generate_name,
            ..ObjectMeta::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_owned()),
        string_data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_owned(),
            docker_config_json(registry)?,
        )])),
        ..Secret::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> PrivateRegistry {
        PrivateRegistry {
            server: "registry.example.com".into(),
            username: "user".into(),
            password: "pass".into(),
        }
    }

    #[test]
    fn docker_config_carries_basic_auth() {
        let config: serde_json::Value = serde_json::from_str(&docker_config_json(&registry()).unwrap()).unwrap();
        assert_eq!(
            config,
            json!({
                "auths": {
                    "registry.example.com": {
                        "username": "user",
                        "password": "pass",
                        "auth": "dXNlcjpwYXNz",
                    }
                }
            })
        );
    }

    #[test]
    fn generated_secrets_have_no_name() {
        let secret = registry_secret(SecretName::Generated("private-registry-".into()), &registry()).unwrap();
        assert_eq!(secret.metadata.name, None);
        assert_eq!(secret.metadata.generate_name.as_deref(), Some("private-registry-"));
        assert_eq!(secret.type_.as_deref(), Some(DOCKER_CONFIG_JSON_TYPE));
        assert!(secret.metadata.owner_references.is_none());
    }
}
