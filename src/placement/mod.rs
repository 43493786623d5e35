//! Latency-aware placement engine (C2): for a network function and a site
//! set, pick the site minimizing a weighted score subject to capacity and
//! QoS constraints.

use crate::config::PlacementSettings;
use crate::error::{PlacementError, Result};
use crate::intent::QosProfile;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Edge,
    Regional,
    Central,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum NfType {
    Ran,
    Cn,
    Tn,
    Upf,
    Amf,
    Smf,
}

impl NfType {
    fn prefers(self, site: SiteType) -> f64 {
        match (self, site) {
            (NfType::Ran, SiteType::Edge) => 0.0,
            (NfType::Upf, SiteType::Regional) => 0.0,
            (NfType::Cn, SiteType::Regional) => 0.0,
            (NfType::Smf | NfType::Amf, SiteType::Regional) => 0.1,
            (_, SiteType::Central) => 0.5,
            _ => 0.8,
        }
    }
}

/// Label value for the `placement_decisions_total{placement_type,result}`
/// metric — the NF type lowercased, matching the rest of the label set.
fn placement_type(nf_type: NfType) -> &'static str {
    match nf_type {
        NfType::Ran => "ran",
        NfType::Cn => "cn",
        NfType::Tn => "tn",
        NfType::Upf => "upf",
        NfType::Amf => "amf",
        NfType::Smf => "smf",
    }
}

/// Scoring prefers edge placement for latency-sensitive NF types.
fn type_preference(nf_type: NfType, site_type: SiteType, slice_type: &crate::intent::SliceType) -> f64 {
    use crate::intent::SliceType;
    if matches!(slice_type, SliceType::Urllc) && site_type == SiteType::Edge {
        return 0.0;
    }
    nf_type.prefers(site_type)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirements {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
    pub bandwidth_mbps: f64,
}

/// Per-type capability set (`{defaultResources, defaultPorts,
/// configSchema}`): the polymorphism spec.md §9 asks for over NF types —
/// a tagged variant plus a small table, not a subclass hierarchy. Adding
/// a new `NfType` means adding a match arm here, nowhere else.
pub struct NfCapability {
    pub default_resources: Requirements,
    pub default_ports: &'static [u16],
    pub config_schema: &'static [&'static str],
}

/// Look up the capability set for `nf_type`. `default_resources` seeds a
/// `NetworkFunction`'s requirements before the operator's QoS-derived
/// bandwidth is folded in; `default_ports` seeds the rendered package's
/// service spec; `config_schema` lists the variables the package
/// generator's template must be able to resolve for this NF type.
pub fn capability(nf_type: NfType) -> NfCapability {
    match nf_type {
        NfType::Ran => NfCapability {
            default_resources: Requirements {
                cpu_cores: 2,
                memory_gb: 4,
                storage_gb: 10,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[38412], // NGAP
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
        NfType::Cn => NfCapability {
            default_resources: Requirements {
                cpu_cores: 4,
                memory_gb: 8,
                storage_gb: 20,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[36412], // S1AP
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
        NfType::Tn => NfCapability {
            default_resources: Requirements {
                cpu_cores: 1,
                memory_gb: 2,
                storage_gb: 5,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[4789], // VXLAN
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
        NfType::Upf => NfCapability {
            default_resources: Requirements {
                cpu_cores: 4,
                memory_gb: 8,
                storage_gb: 20,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[2152, 8805], // GTP-U, PFCP
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
        NfType::Amf => NfCapability {
            default_resources: Requirements {
                cpu_cores: 2,
                memory_gb: 4,
                storage_gb: 10,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[38412], // NGAP
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
        NfType::Smf => NfCapability {
            default_resources: Requirements {
                cpu_cores: 2,
                memory_gb: 4,
                storage_gb: 10,
                bandwidth_mbps: 0.0,
            },
            default_ports: &[8805], // PFCP
            config_schema: &["name", "nf_type", "site_id", "image"],
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkFunction {
    pub id: String,
    pub nf_type: NfType,
    pub requirements: Requirements,
    pub qos: QosProfile,
    pub target_clusters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub region: String,
    pub zone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Capacity {
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub storage_gb: u32,
    pub bandwidth_mbps: f64,
}

impl Capacity {
    fn meets(&self, req: &Requirements) -> bool {
        self.cpu_cores >= req.cpu_cores
            && self.memory_gb >= req.memory_gb
            && self.storage_gb >= req.storage_gb
            && self.bandwidth_mbps >= req.bandwidth_mbps
    }

    fn checked_sub(&mut self, req: &Requirements) -> bool {
        if !self.meets(req) {
            return false;
        }
        self.cpu_cores -= req.cpu_cores;
        self.memory_gb -= req.memory_gb;
        self.storage_gb -= req.storage_gb;
        self.bandwidth_mbps -= req.bandwidth_mbps;
        true
    }

    fn add(&mut self, req: &Requirements) {
        self.cpu_cores += req.cpu_cores;
        self.memory_gb += req.memory_gb;
        self.storage_gb += req.storage_gb;
        self.bandwidth_mbps += req.bandwidth_mbps;
    }

    /// Fraction of `total` currently free, used by the score's capacity
    /// term. Bucketed to 10% granularity for cache-invalidation purposes.
    fn free_fraction(&self, total: &Capacity) -> f64 {
        let frac = |free: f64, tot: f64| if tot > 0.0 { free / tot } else { 0.0 };
        let fractions = [
            frac(self.cpu_cores as f64, total.cpu_cores as f64),
            frac(self.memory_gb as f64, total.memory_gb as f64),
            frac(self.storage_gb as f64, total.storage_gb as f64),
            frac(self.bandwidth_mbps, total.bandwidth_mbps),
        ];
        fractions.iter().cloned().fold(f64::MAX, f64::min)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkProfile {
    pub base_latency_ms: f64,
    pub max_throughput_mbps: f64,
    pub packet_loss_rate: f64,
    pub jitter_ms: f64,
}

/// A compute location. Capacity is mutated only through [`PlacementEngine::place`]
/// and [`PlacementEngine::release`] — a single-writer capacity ledger.
pub struct Site {
    pub id: String,
    pub site_type: SiteType,
    pub location: Location,
    pub total_capacity: Capacity,
    capacity: Mutex<Capacity>,
    pub network_profile: NetworkProfile,
    pub available: std::sync::atomic::AtomicBool,
}

impl Site {
    pub fn new(
        id: impl Into<String>,
        site_type: SiteType,
        location: Location,
        capacity: Capacity,
        network_profile: NetworkProfile,
    ) -> Self {
        Self {
            id: id.into(),
            site_type,
            location,
            total_capacity: capacity,
            capacity: Mutex::new(capacity),
            network_profile,
            available: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn free_capacity(&self) -> Capacity {
        *self.capacity.lock().unwrap()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub site_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub nf_id: String,
    pub site_id: String,
    pub score: f64,
    pub expected_latency_ms: f64,
    pub expected_throughput_mbps: f64,
    pub alternatives: Vec<Alternative>,
}

struct CacheEntry {
    decision: PlacementDecision,
    site_set_generation: u64,
    capacity_buckets: Vec<(String, u8, bool)>,
}

/// Picks a site for a network function, enforcing the single-writer
/// capacity ledger (Testable Property 10) and caching decisions until a
/// referenced site's capacity bucket or availability changes.
pub struct PlacementEngine {
    sites: DashMap<String, Site>,
    settings: PlacementSettings,
    generation: AtomicU64,
    cache: Mutex<std::collections::HashMap<u64, CacheEntry>>,
}

impl PlacementEngine {
    pub fn new(settings: PlacementSettings) -> Self {
        Self {
            sites: DashMap::new(),
            settings,
            generation: AtomicU64::new(0),
            cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn add_site(&self, site: Site) {
        self.sites.insert(site.id.clone(), site);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn site_ids(&self) -> Vec<String> {
        self.sites.iter().map(|e| e.key().clone()).collect()
    }

    fn capacity_bucket(frac: f64) -> u8 {
        (frac.clamp(0.0, 1.0) * 10.0).floor() as u8
    }

    fn cache_key(nf: &NetworkFunction, site_ids: &[String]) -> u64 {
        let mut hasher = DefaultHasher::new();
        nf.requirements.cpu_cores.hash(&mut hasher);
        nf.requirements.memory_gb.hash(&mut hasher);
        nf.requirements.storage_gb.hash(&mut hasher);
        (nf.requirements.bandwidth_mbps.to_bits()).hash(&mut hasher);
        (nf.qos.bandwidth.to_bits()).hash(&mut hasher);
        (nf.qos.latency.to_bits()).hash(&mut hasher);
        let mut sorted = site_ids.to_vec();
        sorted.sort();
        sorted.hash(&mut hasher);
        hasher.finish()
    }

    fn current_buckets(&self, site_ids: &[String]) -> Vec<(String, u8, bool)> {
        site_ids
            .iter()
            .filter_map(|id| self.sites.get(id))
            .map(|s| {
                let free = s.free_capacity();
                let frac = free.free_fraction(&s.total_capacity);
                (s.id.clone(), Self::capacity_bucket(frac), s.is_available())
            })
            .collect()
    }

    /// Choose a site for `nf`, subject to the four hard filters and the
    /// weighted latency/capacity/type-match scoring formula.
    pub fn place(&self, nf: &NetworkFunction) -> Result<PlacementDecision> {
        let site_ids = self.site_ids();
        let key = Self::cache_key(nf, &site_ids);
        let generation = self.generation.load(Ordering::SeqCst);
        let buckets = self.current_buckets(&site_ids);

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&key) {
                if entry.site_set_generation == generation && entry.capacity_buckets == buckets {
                    return Ok(entry.decision.clone());
                }
            }
        }

        let tolerance = 0.1;
        let mut reasons: Vec<(String, String)> = Vec::new();
        let mut survivors_after_availability = 0usize;
        let mut survivors_after_capacity = 0usize;
        let mut candidates: Vec<(f64, &str, SiteType, f64, f64)> = Vec::new();

        for site_ref in self.sites.iter() {
            let site = site_ref.value();

            if !site.is_available() {
                reasons.push((site.id.clone(), "unavailable".to_string()));
                continue;
            }
            survivors_after_availability += 1;

            let free = site.free_capacity();
            if !free.meets(&nf.requirements) {
                reasons.push((site.id.clone(), "insufficient_capacity".to_string()));
                continue;
            }
            survivors_after_capacity += 1;

            if site.network_profile.base_latency_ms > nf.qos.latency {
                reasons.push((site.id.clone(), "latency_exceeded".to_string()));
                continue;
            }

            if site.network_profile.max_throughput_mbps < nf.qos.bandwidth * (1.0 + tolerance) {
                reasons.push((site.id.clone(), "throughput_insufficient".to_string()));
                continue;
            }

            let norm_latency = site.network_profile.base_latency_ms / 100.0;
            let free_frac = free.free_fraction(&site.total_capacity).max(0.001);
            let norm_cap = 1.0 / free_frac;
            let type_pref = type_preference(nf.nf_type, site.site_type, &nf.qos.slice_type);

            let score = self.settings.weight_latency * norm_latency
                + self.settings.weight_capacity * norm_cap
                + self.settings.weight_type_match * type_pref;

            candidates.push((score, site.id.as_str(), site.site_type, site.network_profile.base_latency_ms, site.network_profile.max_throughput_mbps));
        }

        if candidates.is_empty() {
            // CapacityExhausted only applies when the capacity filter is what
            // emptied the set: at least one site was available, and every
            // available site failed on capacity specifically. If every site
            // was unavailable (or some failed later filters like latency),
            // that's a plain NoCandidates with the per-site rationale.
            let capacity_exhausted = survivors_after_availability > 0 && survivors_after_capacity == 0;
            let result = if capacity_exhausted {
                "capacity_exhausted"
            } else {
                "no_candidates"
            };
            crate::monitoring::prometheus::global()
                .record_placement_decision(placement_type(nf.nf_type), result);
            if capacity_exhausted {
                return Err(PlacementError::CapacityExhausted.into());
            }
            return Err(PlacementError::NoCandidates { reasons }.into());
        }

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        let (best_score, best_id, _, best_latency, best_throughput) = candidates[0];
        let alternatives = candidates
            .iter()
            .skip(1)
            .take(self.settings.top_k_alternatives)
            .map(|c| Alternative {
                site_id: c.1.to_string(),
                score: c.0,
            })
            .collect();

        let decision = PlacementDecision {
            nf_id: nf.id.clone(),
            site_id: best_id.to_string(),
            score: best_score,
            expected_latency_ms: best_latency,
            expected_throughput_mbps: best_throughput,
            alternatives,
        };

        let mut cache = self.cache.lock().unwrap();
        if cache.len() >= self.settings.cache_capacity {
            cache.clear();
        }
        cache.insert(
            key,
            CacheEntry {
                decision: decision.clone(),
                site_set_generation: generation,
                capacity_buckets: buckets,
            },
        );

        crate::monitoring::prometheus::global()
            .record_placement_decision(placement_type(nf.nf_type), "success");

        Ok(decision)
    }

    /// Decrement a site's capacity ledger. Single mutation point.
    pub fn reserve(&self, site_id: &str, req: &Requirements) -> Result<()> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| PlacementError::UnknownNf {
                nf_id: site_id.to_string(),
            })?;
        let mut cap = site.capacity.lock().unwrap();
        if !cap.checked_sub(req) {
            return Err(PlacementError::CapacityExhausted.into());
        }
        drop(cap);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Increment a site's capacity ledger on release.
    pub fn release(&self, site_id: &str, req: &Requirements) -> Result<()> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| PlacementError::UnknownNf {
                nf_id: site_id.to_string(),
            })?;
        let mut cap = site.capacity.lock().unwrap();
        cap.add(req);
        drop(cap);
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::SliceType;

    fn sample_qos(slice_type: SliceType, bandwidth: f64, latency: f64) -> QosProfile {
        QosProfile {
            bandwidth,
            latency,
            jitter: None,
            packet_loss: None,
            reliability: None,
            slice_type,
        }
    }

    fn edge_site(id: &str, base_latency_ms: f64) -> Site {
        Site::new(
            id,
            SiteType::Edge,
            Location {
                lat: 0.0,
                lon: 0.0,
                region: "r1".into(),
                zone: "z1".into(),
            },
            Capacity {
                cpu_cores: 16,
                memory_gb: 64,
                storage_gb: 500,
                bandwidth_mbps: 100.0,
            },
            NetworkProfile {
                base_latency_ms,
                max_throughput_mbps: 100.0,
                packet_loss_rate: 0.0,
                jitter_ms: 0.0,
            },
        )
    }

    #[test]
    fn scenario_a_picks_low_latency_edge() {
        let engine = PlacementEngine::new(PlacementSettings::default());
        engine.add_site(edge_site("edge-1", 1.0));
        engine.add_site(edge_site("edge-2", 50.0));

        let nf = NetworkFunction {
            id: "nf-1".into(),
            nf_type: NfType::Ran,
            requirements: Requirements {
                cpu_cores: 2,
                memory_gb: 4,
                storage_gb: 10,
                bandwidth_mbps: 5.5,
            },
            qos: sample_qos(SliceType::Embb, 5.0, 9.0),
            target_clusters: vec!["edge-1".into()],
        };

        let decision = engine.place(&nf).unwrap();
        assert_eq!(decision.site_id, "edge-1");
    }

    #[test]
    fn scenario_b_no_candidates_with_latency_reason() {
        let engine = PlacementEngine::new(PlacementSettings::default());
        engine.add_site(edge_site("edge-1", 5.0));
        engine.add_site(edge_site("edge-2", 6.0));

        let nf = NetworkFunction {
            id: "nf-2".into(),
            nf_type: NfType::Upf,
            requirements: Requirements {
                cpu_cores: 1,
                memory_gb: 1,
                storage_gb: 1,
                bandwidth_mbps: 1.0,
            },
            qos: sample_qos(SliceType::Urllc, 1.0, 1.0),
            target_clusters: vec![],
        };

        let err = engine.place(&nf).unwrap_err();
        match err {
            crate::error::OrchestratorError::Placement(
                crate::error::PlacementError::NoCandidates { reasons },
            ) => {
                assert!(reasons.iter().all(|(_, r)| r == "latency_exceeded"));
            }
            other => panic!("expected NoCandidates, got {other:?}"),
        }
    }

    #[test]
    fn all_sites_unavailable_is_no_candidates_not_capacity_exhausted() {
        let engine = PlacementEngine::new(PlacementSettings::default());
        let site = edge_site("edge-1", 1.0);
        site.set_available(false);
        engine.add_site(site);

        let nf = NetworkFunction {
            id: "nf-unavailable".into(),
            nf_type: NfType::Upf,
            requirements: Requirements {
                cpu_cores: 1,
                memory_gb: 1,
                storage_gb: 1,
                bandwidth_mbps: 1.0,
            },
            qos: sample_qos(SliceType::Urllc, 1.0, 1.0),
            target_clusters: vec![],
        };

        let err = engine.place(&nf).unwrap_err();
        match err {
            crate::error::OrchestratorError::Placement(
                crate::error::PlacementError::NoCandidates { reasons },
            ) => {
                assert!(reasons.iter().all(|(_, r)| r == "unavailable"));
            }
            other => panic!("expected NoCandidates for an all-unavailable site set, got {other:?}"),
        }
    }

    #[test]
    fn capacity_ledger_never_goes_negative() {
        let engine = PlacementEngine::new(PlacementSettings::default());
        engine.add_site(edge_site("edge-1", 1.0));

        let req = Requirements {
            cpu_cores: 16,
            memory_gb: 64,
            storage_gb: 500,
            bandwidth_mbps: 100.0,
        };
        engine.reserve("edge-1", &req).unwrap();
        assert!(engine.reserve("edge-1", &req).is_err());
        engine.release("edge-1", &req).unwrap();
        engine.reserve("edge-1", &req).unwrap();
    }

    #[test]
    fn reducing_capacity_never_improves_score() {
        let engine = PlacementEngine::new(PlacementSettings::default());
        engine.add_site(edge_site("edge-1", 1.0));

        let nf = NetworkFunction {
            id: "nf-3".into(),
            nf_type: NfType::Ran,
            requirements: Requirements {
                cpu_cores: 1,
                memory_gb: 1,
                storage_gb: 1,
                bandwidth_mbps: 1.0,
            },
            qos: sample_qos(SliceType::Embb, 1.0, 10.0),
            target_clusters: vec![],
        };
        let before = engine.place(&nf).unwrap().score;

        engine
            .reserve(
                "edge-1",
                &Requirements {
                    cpu_cores: 10,
                    memory_gb: 40,
                    storage_gb: 300,
                    bandwidth_mbps: 50.0,
                },
            )
            .unwrap();

        let after = engine.place(&nf).unwrap().score;
        assert!(after >= before);
    }

    #[test]
    fn capability_table_covers_every_nf_type() {
        for nf_type in [
            NfType::Ran,
            NfType::Cn,
            NfType::Tn,
            NfType::Upf,
            NfType::Amf,
            NfType::Smf,
        ] {
            let cap = capability(nf_type);
            assert!(!cap.default_ports.is_empty());
            assert!(cap.config_schema.contains(&"name"));
        }
    }
}
