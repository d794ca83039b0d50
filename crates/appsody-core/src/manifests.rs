//! Kubernetes documents written by the CLI: the `AppsodyApplication` custom
//! resource, a Knative service, and the Deployment / Service / Ingress used
//! to run the dev loop inside a cluster.

use crate::error::{AppsodyError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const APPSODY_API_VERSION: &str = "appsody.dev/v1beta1";
pub const APPSODY_KIND: &str = "AppsodyApplication";

type Extra = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// AppsodyApplication
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Fields the CLI reads or writes; everything else a stack ships (probes,
/// monitoring, storage, ...) is carried through `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub application_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_knative_service: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppsodyApplication {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(flatten)]
    pub extra: Extra,
}

impl AppsodyApplication {
    /// The document used when a stack ships no `app-deploy.yaml`.
    pub fn generated(project_name: &str, image: &str, stack: &str, port: u16) -> Self {
        Self {
            api_version: APPSODY_API_VERSION.into(),
            kind: APPSODY_KIND.into(),
            metadata: ObjectMeta {
                name: project_name.into(),
                ..ObjectMeta::default()
            },
            spec: ApplicationSpec {
                version: Some("1.0.0".into()),
                application_image: image.into(),
                stack: Some(stack.into()),
                expose: Some(true),
                service: Some(ServiceSpec {
                    service_type: Some("NodePort".into()),
                    port: (port > 0).then_some(port),
                    extra: Extra::new(),
                }),
                create_knative_service: Some(false),
                ..ApplicationSpec::default()
            },
            extra: Extra::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            AppsodyError::UserInput(format!("Could not read {} file: {e}", path.display()))
        })?;
        serde_yaml::from_str(&data).map_err(|e| {
            AppsodyError::UserInput(format!("{} formatting error: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        crate::io::atomic_write(path, serde_yaml::to_string(self)?.as_bytes())
    }
}

/// Replace the `APPSODY_*` placeholders of a stack's app-deploy template.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter()
        .fold(template.to_string(), |acc, (k, v)| acc.replace(k, v))
}

// ---------------------------------------------------------------------------
// Knative service
// ---------------------------------------------------------------------------

const KNATIVE_TEMPLATE: &str = r#"
apiVersion: serving.knative.dev/v1alpha1
kind: Service
metadata:
  name: test
spec:
  runLatest:
    configuration:
      revisionTemplate:
        spec:
          container:
            image: myimage
            imagePullPolicy: Always
            ports:
            - containerPort: 8080
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnativeContainer {
    image: String,
    image_pull_policy: String,
    #[serde(default)]
    ports: Vec<BTreeMap<String, u16>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KnativePodSpec {
    container: KnativeContainer,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KnativeRevision {
    spec: KnativePodSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnativeConfiguration {
    revision_template: KnativeRevision,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KnativeRunLatest {
    configuration: KnativeConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KnativeSpec {
    run_latest: KnativeRunLatest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnativeService {
    api_version: String,
    kind: String,
    metadata: ObjectMeta,
    spec: KnativeSpec,
}

impl KnativeService {
    /// A single-port Knative service. Images that were not pushed are never
    /// pulled by the cluster.
    pub fn new(name: &str, image: &str, port: u16, pushed: bool) -> Result<Self> {
        let mut svc: KnativeService = serde_yaml::from_str(KNATIVE_TEMPLATE)?;
        svc.metadata.name = name.to_string();
        let container = &mut svc.spec.run_latest.configuration.revision_template.spec.container;
        container.image = image.to_string();
        if !pushed {
            container.image_pull_policy = "Never".into();
        }
        container.ports = knative_ports(std::mem::take(&mut container.ports), port);
        Ok(svc)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn ports(&self) -> &[BTreeMap<String, u16>] {
        &self.spec.run_latest.configuration.revision_template.spec.container.ports
    }
}

/// Knative allows exactly one `containerPort` entry; anything else is
/// dropped with a warning and replaced.
fn knative_ports(ports: Vec<BTreeMap<String, u16>>, port: u16) -> Vec<BTreeMap<String, u16>> {
    if ports.len() > 1 {
        tracing::warn!("KNative yaml template defines more than one port. This is invalid.");
    }
    if !ports.is_empty() && !ports.iter().any(|p| p.contains_key("containerPort")) {
        tracing::warn!("The Knative template defines a port with a key other than containerPort. This is invalid.");
        tracing::warn!("Replacing it with a containerPort entry.");
    }
    vec![BTreeMap::from([("containerPort".to_string(), port)])]
}

// ---------------------------------------------------------------------------
// In-cluster dev loop
// ---------------------------------------------------------------------------

/// Owner reference that ties generated resources to an IDE-managed ReplicaSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub block_owner_deletion: bool,
    pub controller: bool,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

/// Environment supplied by an IDE integration running the CLI in-cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterEnv {
    pub project_id: Option<String>,
    pub owner: Option<OwnerReference>,
    pub service_account: Option<String>,
    pub pvc_name: String,
}

pub const DEFAULT_WORKSPACE_PVC: &str = "appsody-workspace";

impl ClusterEnv {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());
        let owner = match (var("CODEWIND_OWNER_NAME"), var("CODEWIND_OWNER_UID")) {
            (Some(name), Some(uid)) => Some(OwnerReference {
                api_version: "apps/v1".into(),
                block_owner_deletion: true,
                controller: true,
                kind: "ReplicaSet".into(),
                name,
                uid,
            }),
            _ => None,
        };
        Self {
            project_id: var("CODEWIND_PROJECT_ID"),
            owner,
            service_account: var("SERVICE_ACCOUNT_NAME"),
            pvc_name: var("PVC_NAME").unwrap_or_else(|| DEFAULT_WORKSPACE_PVC.into()),
        }
    }

    fn labels(&self, app: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([("release".to_string(), app.to_string())]);
        if let Some(id) = &self.project_id {
            labels.insert("projectID".into(), id.clone());
        }
        labels
    }

    fn owner_references(&self) -> Value {
        match &self.owner {
            Some(o) => serde_yaml::to_value(vec![o]).unwrap_or(Value::Null),
            None => Value::Null,
        }
    }
}

/// Inputs for the dev-loop Deployment.
#[derive(Debug, Clone, Default)]
pub struct DevDeployment {
    pub app: String,
    pub image: String,
    pub controller_image: String,
    pub ports: Vec<u16>,
    /// `host:container` mounts; hosts are made relative to the workspace root.
    pub mounts: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub args: Vec<String>,
}

fn mapping(pairs: Vec<(&str, Value)>) -> Value {
    let mut m = serde_yaml::Mapping::new();
    for (k, v) in pairs {
        if !v.is_null() {
            m.insert(Value::from(k), v);
        }
    }
    Value::Mapping(m)
}

fn s(v: &str) -> Value {
    Value::from(v)
}

fn non_empty(items: Vec<Value>) -> Value {
    if items.is_empty() {
        Value::Null
    } else {
        Value::Sequence(items)
    }
}

impl DevDeployment {
    pub fn to_value(&self, env: &ClusterEnv) -> Value {
        let mut volume_mounts = vec![mapping(vec![
            ("name", s("appsody-controller")),
            ("mountPath", s("/.appsody")),
        ])];
        for mount in &self.mounts {
            let Some((src, dst)) = mount.split_once(':') else {
                continue;
            };
            let sub_path = src.trim_start_matches('/');
            volume_mounts.push(mapping(vec![
                ("name", s(DEFAULT_WORKSPACE_PVC)),
                ("mountPath", s(dst)),
                ("subPath", s(if sub_path.is_empty() { "." } else { sub_path })),
            ]));
        }
        let ports: Vec<Value> = self
            .ports
            .iter()
            .map(|p| mapping(vec![("containerPort", Value::from(*p))]))
            .collect();
        let env_vars: Vec<Value> = self
            .env
            .iter()
            .map(|(k, v)| mapping(vec![("name", s(k)), ("value", s(v))]))
            .collect();

        let container = mapping(vec![
            ("name", s(&self.app)),
            ("image", s(&self.image)),
            ("imagePullPolicy", s("Always")),
            ("command", Value::from(vec![crate::paths::CLUSTER_CONTROLLER_PATH])),
            ("args", non_empty(self.args.iter().map(|a| s(a)).collect())),
            ("ports", non_empty(ports)),
            ("env", non_empty(env_vars)),
            ("volumeMounts", Value::Sequence(volume_mounts)),
        ]);
        let init_container = mapping(vec![
            ("name", s("init-appsody-controller")),
            ("image", s(&self.controller_image)),
            ("imagePullPolicy", s("IfNotPresent")),
            (
                "volumeMounts",
                Value::Sequence(vec![mapping(vec![
                    ("name", s("appsody-controller")),
                    ("mountPath", s("/.appsody")),
                ])]),
            ),
        ]);
        let volumes = Value::Sequence(vec![
            mapping(vec![("name", s("appsody-controller")), ("emptyDir", mapping(vec![]))]),
            mapping(vec![
                ("name", s(DEFAULT_WORKSPACE_PVC)),
                ("persistentVolumeClaim", mapping(vec![("claimName", s(&env.pvc_name))])),
            ]),
        ]);
        let app_label = mapping(vec![("app", s(&self.app))]);
        let mut pod_labels = BTreeMap::from([
            ("app".to_string(), self.app.clone()),
            ("release".to_string(), self.app.clone()),
        ]);
        if let Some(id) = &env.project_id {
            pod_labels.insert("projectID".into(), id.clone());
        }

        mapping(vec![
            ("apiVersion", s("apps/v1")),
            ("kind", s("Deployment")),
            (
                "metadata",
                mapping(vec![
                    ("name", s(&self.app)),
                    ("labels", serde_yaml::to_value(env.labels(&self.app)).unwrap_or(Value::Null)),
                    ("ownerReferences", env.owner_references()),
                ]),
            ),
            (
                "spec",
                mapping(vec![
                    ("selector", mapping(vec![("matchLabels", app_label)])),
                    ("replicas", Value::from(1)),
                    (
                        "template",
                        mapping(vec![
                            (
                                "metadata",
                                mapping(vec![(
                                    "labels",
                                    serde_yaml::to_value(pod_labels).unwrap_or(Value::Null),
                                )]),
                            ),
                            (
                                "spec",
                                mapping(vec![
                                    (
                                        "serviceAccountName",
                                        s(env.service_account.as_deref().unwrap_or("appsody-sa")),
                                    ),
                                    ("initContainers", Value::Sequence(vec![init_container])),
                                    ("containers", Value::Sequence(vec![container])),
                                    ("volumes", volumes),
                                ]),
                            ),
                        ]),
                    ),
                ]),
            ),
        ])
    }
}

pub fn dev_service(app: &str, ports: &[u16], env: &ClusterEnv) -> Value {
    let ports: Vec<Value> = ports
        .iter()
        .enumerate()
        .map(|(i, p)| {
            mapping(vec![
                ("name", s(&format!("port-{i}"))),
                ("port", Value::from(*p)),
                ("targetPort", Value::from(*p)),
            ])
        })
        .collect();
    mapping(vec![
        ("apiVersion", s("v1")),
        ("kind", s("Service")),
        (
            "metadata",
            mapping(vec![
                ("name", s(&format!("{app}-service"))),
                ("labels", serde_yaml::to_value(env.labels(app)).unwrap_or(Value::Null)),
                ("ownerReferences", env.owner_references()),
            ]),
        ),
        (
            "spec",
            mapping(vec![
                ("selector", mapping(vec![("app", s(app))])),
                ("type", s("NodePort")),
                ("ports", Value::Sequence(ports)),
            ]),
        ),
    ])
}

pub fn dev_ingress(app: &str, host: &str, port: u16) -> Value {
    let backend = mapping(vec![
        ("serviceName", s(&format!("{app}-service"))),
        ("servicePort", Value::from(port)),
    ]);
    let path = mapping(vec![("path", s("/")), ("backend", backend)]);
    let rule = mapping(vec![
        ("host", s(host)),
        ("http", mapping(vec![("paths", Value::Sequence(vec![path]))])),
    ]);
    mapping(vec![
        ("apiVersion", s("extensions/v1beta1")),
        ("kind", s("Ingress")),
        ("metadata", mapping(vec![("name", s(&format!("{app}-ingress")))])),
        ("spec", mapping(vec![("rules", Value::Sequence(vec![rule]))])),
    ])
}

/// Ports that look like HTTP win; otherwise the first exposed port.
pub fn ingress_port(exposed: &[String]) -> u16 {
    const KNOWN_HTTP: &[&str] = &["80", "8080", "8008", "3000", "9080"];
    exposed
        .iter()
        .find(|p| KNOWN_HTTP.contains(&p.as_str()))
        .or_else(|| exposed.first())
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

pub fn write_yaml(path: &Path, doc: &Value, dry_run: bool) -> Result<()> {
    let text = serde_yaml::to_string(doc)?;
    tracing::debug!("Generated YAML: \n{text}");
    if dry_run {
        tracing::info!("Skipping creation of yaml file with prefix: {}", path.display());
        return Ok(());
    }
    crate::io::atomic_write(path, text.as_bytes())
}
