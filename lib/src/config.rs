//! Persistence units and the factories that turn them into data sources.

use crate::datasource::DataSource;
use crate::errors::{OrmError, Result as OrmResult};
use crate::memory::MemoryDataSource;
use crate::namespaces::Namespaces;
use crate::transaction::TransactionalDataSource;
use anyhow::{anyhow, Result};
use derive_builder::Builder;
use log::info;
use oxigraph::model::NamedNode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const FACTORY_KEY: &str = "factory";
pub const NAMED_GRAPH_KEY: &str = "named_graph";
pub const TRANSACTIONAL_KEY: &str = "transactional";
pub const FILES_KEY: &str = "files";
pub const NAMESPACE_PREFIX: &str = "namespace.";

/// A named string-to-string map selecting a data source factory and its
/// parameters.
#[derive(Builder, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[builder(setter(into))]
pub struct PersistenceUnit {
    name: String,
    #[builder(default)]
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl PersistenceUnitBuilder {
    pub fn property(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.properties
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }
}

impl PersistenceUnit {
    pub fn builder() -> PersistenceUnitBuilder {
        PersistenceUnitBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The factory name; `memory` when unset.
    pub fn factory(&self) -> &str {
        self.get(FACTORY_KEY).unwrap_or("memory")
    }

    pub fn named_graph(&self) -> OrmResult<Option<NamedNode>> {
        match self.get(NAMED_GRAPH_KEY) {
            Some(iri) => Ok(Some(NamedNode::new(iri)?)),
            None => Ok(None),
        }
    }

    pub fn transactional(&self) -> bool {
        matches!(
            self.get(TRANSACTIONAL_KEY),
            Some("true") | Some("yes") | Some("1")
        )
    }

    /// Prefixes declared as `namespace.<prefix>` properties.
    pub fn namespaces(&self) -> Namespaces {
        let mut ns = Namespaces::new();
        for (key, uri) in &self.properties {
            if let Some(prefix) = key.strip_prefix(NAMESPACE_PREFIX) {
                ns.insert(prefix, uri.as_str());
            }
        }
        ns
    }

    /// The comma-separated `files` parameter.
    pub fn files(&self) -> Vec<PathBuf> {
        self.get(FILES_KEY)
            .map(|files| {
                files
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Persistence units plus the schema documents to register with them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct UnitConfig {
    #[serde(default)]
    pub units: Vec<PersistenceUnit>,
    #[serde(default)]
    pub schemas: Vec<PathBuf>,
}

impl UnitConfig {
    pub fn save_to_file(&self, file: &Path) -> Result<()> {
        let config_str = serde_json::to_string_pretty(&self)?;
        let mut file = std::fs::File::create(file)?;
        file.write_all(config_str.as_bytes())?;
        Ok(())
    }

    /// Loads a config. Relative schema and `files` paths are resolved
    /// against the config file's directory.
    pub fn from_file(file: &Path) -> Result<Self> {
        let reader = BufReader::new(std::fs::File::open(file)?);
        let mut config: UnitConfig = serde_json::from_reader(reader)?;
        let base = file.parent().map(Path::to_path_buf).unwrap_or_default();
        for schema in config.schemas.iter_mut() {
            if schema.is_relative() {
                *schema = base.join(&*schema);
            }
        }
        for unit in config.units.iter_mut() {
            let files = unit.files();
            if files.is_empty() {
                continue;
            }
            let joined: Vec<String> = files
                .iter()
                .map(|f| {
                    if f.is_relative() {
                        base.join(f).display().to_string()
                    } else {
                        f.display().to_string()
                    }
                })
                .collect();
            unit.properties
                .insert(FILES_KEY.to_string(), joined.join(","));
        }
        Ok(config)
    }

    pub fn unit(&self, name: &str) -> Result<&PersistenceUnit> {
        self.units
            .iter()
            .find(|u| u.name == name)
            .ok_or_else(|| anyhow!("No persistence unit named '{}'", name))
    }
}

/// Builds a data source from a persistence unit.
pub trait DataSourceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, unit: &PersistenceUnit) -> OrmResult<Arc<dyn DataSource>>;
}

/// The `memory` factory: an oxigraph store preloaded with `files`.
#[derive(Debug, Default)]
pub struct MemoryFactory;

impl DataSourceFactory for MemoryFactory {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(&self, unit: &PersistenceUnit) -> OrmResult<Arc<dyn DataSource>> {
        let ds = MemoryDataSource::new()?;
        let graph = unit.named_graph()?;
        for file in unit.files() {
            ds.load_file(&file, graph.as_ref())?;
        }
        info!(
            "Created memory data source for unit '{}' ({} statements)",
            unit.name(),
            ds.stats()?.num_quads
        );
        if unit.transactional() {
            Ok(Arc::new(TransactionalDataSource::new(ds)))
        } else {
            Ok(Arc::new(ds))
        }
    }
}

/// Factories by name.
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn DataSourceFactory>>,
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FactoryRegistry {
    pub fn empty() -> Self {
        FactoryRegistry {
            factories: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MemoryFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn DataSourceFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    pub fn get(&self, name: &str) -> OrmResult<Arc<dyn DataSourceFactory>> {
        self.factories.get(name).cloned().ok_or_else(|| {
            OrmError::illegal_argument(format!("no data source factory named '{}'", name))
        })
    }

    pub fn create(&self, unit: &PersistenceUnit) -> OrmResult<Arc<dyn DataSource>> {
        self.get(unit.factory())?.create(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_accessors() {
        let unit = PersistenceUnit::builder()
            .name("people")
            .property("factory", "memory")
            .property("transactional", "true")
            .property("named_graph", "http://example.org/g")
            .property("namespace.ex", "http://example.org/")
            .property("files", "a.ttl, b.nt,")
            .build()
            .unwrap();
        assert_eq!(unit.factory(), "memory");
        assert!(unit.transactional());
        assert_eq!(
            unit.named_graph().unwrap().unwrap().as_str(),
            "http://example.org/g"
        );
        assert_eq!(unit.namespaces().get("ex"), Some("http://example.org/"));
        assert_eq!(
            unit.files(),
            vec![PathBuf::from("a.ttl"), PathBuf::from("b.nt")]
        );
        assert!(PersistenceUnit::builder().build().is_err());
    }

    #[test]
    fn registry_builds_memory_sources() {
        let registry = FactoryRegistry::with_defaults();
        let unit = PersistenceUnit::builder()
            .name("tx")
            .property("transactional", "true")
            .build()
            .unwrap();
        let ds = registry.create(&unit).unwrap();
        assert!(ds.transactions().is_some());

        let plain = PersistenceUnit::builder().name("plain").build().unwrap();
        assert!(registry.create(&plain).unwrap().transactions().is_none());

        let unknown = PersistenceUnit::builder()
            .name("x")
            .property("factory", "sesame")
            .build()
            .unwrap();
        assert!(registry.create(&unknown).is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = UnitConfig {
            units: vec![PersistenceUnit::builder()
                .name("main")
                .property("files", "data.ttl")
                .build()
                .unwrap()],
            schemas: vec![PathBuf::from("schema.json")],
        };
        let path = dir.path().join("rdfmap.json");
        config.save_to_file(&path).unwrap();
        let loaded = UnitConfig::from_file(&path).unwrap();
        assert_eq!(loaded.schemas, vec![dir.path().join("schema.json")]);
        let unit = loaded.unit("main").unwrap();
        assert_eq!(unit.files(), vec![dir.path().join("data.ttl")]);
        assert!(loaded.unit("other").is_err());
    }
}
