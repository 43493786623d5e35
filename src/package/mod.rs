//! Deployment package generator (C3): resolves a named template for a
//! placed network function, runs the mutator then validator pipeline, and
//! renders a deterministic, checksummed package tree.

use crate::error::{GenerationError, Result, ValidationError};
use crate::placement::{NetworkFunction, PlacementDecision};
use crate::security;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const ENGINE_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateStyle {
    RawDeclarative,
    OverlayPatched,
    Templated,
    Pipelined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedResource {
    pub file_name: String,
    pub api_version: String,
    pub kind: String,
    pub metadata: BTreeMap<String, serde_yaml::Value>,
    pub spec: serde_yaml::Value,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentPackage {
    pub name: String,
    pub version: String,
    pub pipeline: Vec<String>,
    pub resources: Vec<RenderedResource>,
    pub dependencies: Vec<String>,
    pub checksum: String,
}

struct Template {
    kind: String,
    required_vars: &'static [&'static str],
}

fn template_registry() -> BTreeMap<&'static str, Template> {
    let mut registry = BTreeMap::new();
    registry.insert(
        "vnf-deployment",
        Template {
            kind: "VnfDeployment".to_string(),
            required_vars: &["name", "nf_type", "site_id", "image"],
        },
    );
    registry.insert(
        "vnf-service",
        Template {
            kind: "VnfService".to_string(),
            required_vars: &["name", "site_id"],
        },
    );
    registry
}

fn resolve_template(name: &str) -> Result<Template> {
    template_registry()
        .remove(name)
        .ok_or_else(|| GenerationError::TemplateNotFound {
            name: name.to_string(),
        })
        .map_err(Into::into)
}

fn render_base_resource(
    template_name: &str,
    template: &Template,
    nf: &NetworkFunction,
    decision: &PlacementDecision,
) -> Result<RenderedResource> {
    let vars: BTreeMap<&str, String> = BTreeMap::from([
        ("name", nf.id.clone()),
        ("nf_type", format!("{:?}", nf.nf_type)),
        ("site_id", decision.site_id.clone()),
        ("image", format!("registry.local/{}:latest", nf.id)),
    ]);

    // The NF type's capability set names the config variables its own
    // template rendering relies on (`configSchema`) in addition to
    // whatever the named template itself requires.
    let capability = crate::placement::capability(nf.nf_type);
    for required in template.required_vars.iter().chain(capability.config_schema) {
        if !vars.contains_key(required) {
            return Err(GenerationError::TemplateRenderError {
                variable: required.to_string(),
            }
            .into());
        }
    }

    let mut metadata = BTreeMap::new();
    metadata.insert(
        "name".to_string(),
        serde_yaml::Value::String(nf.id.clone()),
    );

    let ports = capability
        .default_ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let spec = serde_yaml::to_value(BTreeMap::from([
        ("siteId".to_string(), decision.site_id.clone()),
        ("cpuCores".to_string(), nf.requirements.cpu_cores.to_string()),
        ("memoryGB".to_string(), nf.requirements.memory_gb.to_string()),
        ("bandwidthMbps".to_string(), nf.requirements.bandwidth_mbps.to_string()),
        ("ports".to_string(), ports),
    ]))
    .map_err(|e| GenerationError::TemplateRenderError {
        variable: e.to_string(),
    })?;

    Ok(RenderedResource {
        file_name: format!("{template_name}.yaml"),
        api_version: "slicecast.io/v1".to_string(),
        kind: template.kind.clone(),
        metadata,
        spec,
        checksum: String::new(),
    })
}

/// Label injection: every resource gets a fixed set of slicecast-owned
/// labels. Idempotent — re-applying does not change the result.
fn mutate_inject_labels(resource: &mut RenderedResource, nf: &NetworkFunction, decision: &PlacementDecision) {
    let labels = BTreeMap::from([
        ("slicecast.io/nf-id".to_string(), serde_yaml::Value::String(nf.id.clone())),
        (
            "slicecast.io/slice-type".to_string(),
            serde_yaml::Value::String(nf.qos.slice_type.to_string()),
        ),
        (
            "slicecast.io/site-id".to_string(),
            serde_yaml::Value::String(decision.site_id.clone()),
        ),
    ]);
    resource
        .metadata
        .insert("labels".to_string(), serde_yaml::to_value(labels).unwrap());
}

/// Namespace injection: every resource lands in a namespace derived from
/// the NF's slice type.
fn mutate_inject_namespace(resource: &mut RenderedResource, nf: &NetworkFunction) {
    let namespace = format!("slice-{}", nf.qos.slice_type.to_string().to_lowercase());
    resource.metadata.insert(
        "namespace".to_string(),
        serde_yaml::Value::String(namespace),
    );
}

/// Resource-request normalization: ensures cpu/memory are always present
/// as explicit string quantities, never left implicit.
fn mutate_normalize_resource_requests(resource: &mut RenderedResource, nf: &NetworkFunction) {
    if let serde_yaml::Value::Mapping(ref mut map) = resource.spec {
        map.insert(
            serde_yaml::Value::String("cpuCores".to_string()),
            serde_yaml::Value::String(nf.requirements.cpu_cores.to_string()),
        );
        map.insert(
            serde_yaml::Value::String("memoryGB".to_string()),
            serde_yaml::Value::String(nf.requirements.memory_gb.to_string()),
        );
    }
}

fn validate_schema_conformance(resource: &RenderedResource) -> Result<()> {
    if resource.api_version.is_empty() || resource.kind.is_empty() {
        return Err(GenerationError::ValidationFailed {
            rule: "schema_conformance".to_string(),
            file: resource.file_name.clone(),
            rationale: "apiVersion/kind must be non-empty".to_string(),
        }
        .into());
    }
    Ok(())
}

fn validate_required_fields(resource: &RenderedResource) -> Result<()> {
    if !resource.metadata.contains_key("name") {
        return Err(GenerationError::ValidationFailed {
            rule: "required_fields".to_string(),
            file: resource.file_name.clone(),
            rationale: "metadata.name is required".to_string(),
        }
        .into());
    }
    Ok(())
}

fn checksum_of(resource: &RenderedResource) -> Result<String> {
    let mut for_hash = resource.clone();
    for_hash.checksum.clear();
    let bytes = serde_yaml::to_string(&for_hash).map_err(|e| GenerationError::TemplateRenderError {
        variable: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Render a [`DeploymentPackage`] for a placed network function. Same NF +
/// template name + engine version always yields byte-identical output
/// (Testable Property 5).
pub fn generate(
    nf: &NetworkFunction,
    decision: &PlacementDecision,
    template_name: &str,
    style: TemplateStyle,
) -> Result<DeploymentPackage> {
    let template = resolve_template(template_name)?;
    let mut resource = render_base_resource(template_name, &template, nf, decision)?;

    mutate_inject_labels(&mut resource, nf, decision);
    mutate_inject_namespace(&mut resource, nf);
    mutate_normalize_resource_requests(&mut resource, nf);

    validate_schema_conformance(&resource)?;
    validate_required_fields(&resource)?;

    resource.checksum = checksum_of(&resource)?;

    let package_version = format!("{}-{}", ENGINE_VERSION, nf.id);
    let mut hasher = Sha256::new();
    hasher.update(resource.checksum.as_bytes());
    let package_checksum = hex::encode(hasher.finalize());

    Ok(DeploymentPackage {
        name: format!("{}-{}", nf.id, template_name),
        version: package_version,
        pipeline: vec![
            format!("style={style:?}"),
            "mutator:inject_labels".to_string(),
            "mutator:inject_namespace".to_string(),
            "mutator:normalize_resource_requests".to_string(),
            "validator:schema_conformance".to_string(),
            "validator:required_fields".to_string(),
        ],
        resources: vec![resource],
        dependencies: vec![],
        checksum: package_checksum,
    })
}

/// Writes a rendered package to disk as a manifest file plus one file per
/// resource and a checksum sidecar, canonicalizing the target root
/// against path traversal before any write.
pub struct PackageWriter<'a> {
    pub package: &'a DeploymentPackage,
}

impl<'a> PackageWriter<'a> {
    pub fn new(package: &'a DeploymentPackage) -> Self {
        Self { package }
    }

    pub fn write_to(&self, root: &Path) -> Result<PathBuf> {
        let package_dir = root.join(&self.package.name);
        let canonical_root = security::canonicalize_within(root, &package_dir)
            .map_err(|e| -> crate::error::OrchestratorError { e.into() })?;

        std::fs::create_dir_all(&canonical_root)?;

        let manifest = serde_yaml::to_string(&ManifestView {
            name: &self.package.name,
            version: &self.package.version,
            pipeline: &self.package.pipeline,
        })
        .map_err(|e| -> crate::error::OrchestratorError {
            ValidationError::DisallowedCharacters {
                detail: e.to_string(),
            }
            .into()
        })?;
        std::fs::write(canonical_root.join("manifest.yaml"), manifest)?;

        let mut checksums = Vec::new();
        for resource in &self.package.resources {
            let path = security::canonicalize_within(
                &canonical_root,
                Path::new(&resource.file_name),
            )
            .map_err(|e| -> crate::error::OrchestratorError { e.into() })?;
            let body = serde_yaml::to_string(resource).unwrap();
            std::fs::write(&path, body)?;
            checksums.push(format!("{}  {}", resource.checksum, resource.file_name));
        }
        std::fs::write(canonical_root.join("checksums.sha256"), checksums.join("\n"))?;

        Ok(canonical_root)
    }
}

#[derive(Serialize)]
struct ManifestView<'a> {
    name: &'a str,
    version: &'a str,
    pipeline: &'a [String],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{QosProfile, SliceType};
    use crate::placement::{NfType, PlacementDecision, Requirements};

    fn sample_nf() -> NetworkFunction {
        NetworkFunction {
            id: "nf-1".into(),
            nf_type: NfType::Ran,
            requirements: Requirements {
                cpu_cores: 2,
                memory_gb: 4,
                storage_gb: 10,
                bandwidth_mbps: 5.0,
            },
            qos: QosProfile {
                bandwidth: 5.0,
                latency: 9.0,
                jitter: None,
                packet_loss: None,
                reliability: None,
                slice_type: SliceType::Embb,
            },
            target_clusters: vec!["edge-1".into()],
        }
    }

    fn sample_decision() -> PlacementDecision {
        PlacementDecision {
            nf_id: "nf-1".into(),
            site_id: "edge-1".into(),
            score: 0.1,
            expected_latency_ms: 2.0,
            expected_throughput_mbps: 10.0,
            alternatives: vec![],
        }
    }

    #[test]
    fn generate_is_deterministic() {
        let nf = sample_nf();
        let decision = sample_decision();
        let a = generate(&nf, &decision, "vnf-deployment", TemplateStyle::RawDeclarative).unwrap();
        let b = generate(&nf, &decision, "vnf-deployment", TemplateStyle::RawDeclarative).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(
            serde_yaml::to_string(&a).unwrap(),
            serde_yaml::to_string(&b).unwrap()
        );
    }

    #[test]
    fn unknown_template_fails_closed() {
        let nf = sample_nf();
        let decision = sample_decision();
        let err = generate(&nf, &decision, "does-not-exist", TemplateStyle::RawDeclarative);
        assert!(err.is_err());
    }

    #[test]
    fn write_to_rejects_path_traversal_root() {
        let nf = sample_nf();
        let decision = sample_decision();
        let package = generate(&nf, &decision, "vnf-deployment", TemplateStyle::RawDeclarative).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let writer = PackageWriter::new(&package);
        let written = writer.write_to(tmp.path()).unwrap();
        assert!(written.starts_with(tmp.path()));
        assert!(written.join("manifest.yaml").exists());
        assert!(written.join("checksums.sha256").exists());
    }
}
