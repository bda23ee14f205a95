//! Kubeconfig documents handed out for project service accounts.

use serde::Serialize;

/// Inputs of a single-cluster, single-user, token-based kubeconfig.
#[derive(Debug, Clone)]
pub struct KubeconfigParams<'a> {
    pub user_name: &'a str,
    pub context_name: &'a str,
    pub cluster_name: &'a str,
    pub namespace: &'a str,
    pub token: &'a str,
    pub server: &'a str,
    pub ca_data: Option<&'a str>,
}

/// `<cluster>-<project>-<account>`
pub fn context_name(cluster: &str, project: &str, account: &str) -> String {
    format!("{}-{}-{}", cluster, project, account)
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    kind: &'static str,
    clusters: Vec<Named<'a, Cluster<'a>>>,
    users: Vec<Named<'a, User<'a>>>,
    contexts: Vec<Named<'a, Context<'a>>>,
    current_context: &'a str,
}

#[derive(Serialize)]
struct Named<'a, T> {
    name: &'a str,
    #[serde(flatten)]
    value: T,
}

#[derive(Serialize)]
struct Cluster<'a> {
    cluster: ClusterData<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterData<'a> {
    server: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_authority_data: Option<&'a str>,
}

#[derive(Serialize)]
struct User<'a> {
    user: UserData<'a>,
}

#[derive(Serialize)]
struct UserData<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct Context<'a> {
    context: ContextData<'a>,
}

#[derive(Serialize)]
struct ContextData<'a> {
    cluster: &'a str,
    user: &'a str,
    namespace: &'a str,
}

pub fn render_kubeconfig(p: &KubeconfigParams<'_>) -> Result<String, serde_yaml::Error> {
    let doc = Kubeconfig {
        api_version: "v1",
        kind: "Config",
        clusters: vec![Named {
            name: p.cluster_name,
            value: Cluster { cluster: ClusterData { server: p.server, certificate_authority_data: p.ca_data } },
        }],
        users: vec![Named { name: p.user_name, value: User { user: UserData { token: p.token } } }],
        contexts: vec![Named {
            name: p.context_name,
            value: Context {
                context: ContextData { cluster: p.cluster_name, user: p.user_name, namespace: p.namespace },
            },
        }],
        current_context: p.context_name,
    };
    serde_yaml::to_string(&doc)
}
