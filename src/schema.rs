//! Index schema management.
//!
//! [`IndexSchemaManager::ensure_indexes`] makes every named index carry the
//! fields, vector profile, and semantic configuration the sync engine writes
//! to. Missing indexes are created. Existing indexes are only ever extended:
//! missing fields and missing vector/semantic entries are appended, and a
//! required field whose type or dimensionality differs is reported as
//! [`SyncError::SchemaConflict`] rather than changed.

use std::sync::Arc;

use crate::error::{Result, SyncError};
use crate::progress::{SyncEvent, SyncObserver};
use crate::search::{
    FieldDefinition, HnswParameters, IndexDefinition, PrioritizedFields, SearchIndexService,
    SemanticConfiguration, SemanticField, SemanticSearch, VectorAlgorithm, VectorProfile,
    VectorSearch,
};

pub const VECTOR_ALGORITHM: &str = "hnsw_config";
pub const VECTOR_PROFILE: &str = "embedding_config";
pub const SEMANTIC_CONFIG: &str = "default";
/// Image embeddings come from a fixed multimodal model.
pub const IMAGE_EMBEDDING_DIMS: usize = 1024;

/// Which optional parts of the schema are needed.
#[derive(Debug, Clone)]
pub struct SchemaOptions {
    pub embedding_dims: usize,
    pub use_acls: bool,
    pub search_images: bool,
    pub use_int_vectorization: bool,
    pub analyzer_name: Option<String>,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            embedding_dims: 1536,
            use_acls: false,
            search_images: false,
            use_int_vectorization: false,
            analyzer_name: None,
        }
    }
}

pub struct IndexSchemaManager {
    service: Arc<dyn SearchIndexService>,
    options: SchemaOptions,
    observer: Arc<dyn SyncObserver>,
}

impl IndexSchemaManager {
    pub fn new(
        service: Arc<dyn SearchIndexService>,
        options: SchemaOptions,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            service,
            options,
            observer,
        }
    }

    /// The complete field list for the configured options.
    pub fn required_fields(&self) -> Vec<FieldDefinition> {
        let o = &self.options;
        let mut content = FieldDefinition::string("content").searchable();
        if let Some(analyzer) = &o.analyzer_name {
            content = content.with_analyzer(analyzer);
        }

        let mut fields = vec![
            FieldDefinition::string("id").key(),
            content,
            FieldDefinition::vector("embedding", o.embedding_dims, VECTOR_PROFILE),
            FieldDefinition::string("category").filterable().facetable(),
            FieldDefinition::string("sourcepage").filterable().facetable(),
            FieldDefinition::string("sourcefile").filterable().facetable(),
            FieldDefinition::string("storageUrl").filterable(),
        ];
        if o.search_images {
            fields.push(FieldDefinition::vector(
                "imageEmbedding",
                IMAGE_EMBEDDING_DIMS,
                VECTOR_PROFILE,
            ));
        }
        if o.use_acls {
            fields.push(FieldDefinition::new("oids", "Collection(Edm.String)").filterable());
            fields.push(FieldDefinition::new("groups", "Collection(Edm.String)").filterable());
        }
        if o.use_int_vectorization {
            fields.push(FieldDefinition::string("parent_id").filterable());
        }
        fields
    }

    fn vector_search() -> VectorSearch {
        VectorSearch {
            algorithms: vec![VectorAlgorithm {
                name: VECTOR_ALGORITHM.to_string(),
                kind: "hnsw".to_string(),
                hnsw_parameters: Some(HnswParameters {
                    metric: "cosine".to_string(),
                    other: Default::default(),
                }),
                other: Default::default(),
            }],
            profiles: vec![VectorProfile {
                name: VECTOR_PROFILE.to_string(),
                algorithm: VECTOR_ALGORITHM.to_string(),
                other: Default::default(),
            }],
            other: Default::default(),
        }
    }

    fn semantic_configuration() -> SemanticConfiguration {
        SemanticConfiguration {
            name: SEMANTIC_CONFIG.to_string(),
            prioritized_fields: PrioritizedFields {
                title_field: None,
                prioritized_content_fields: vec![SemanticField {
                    field_name: "content".to_string(),
                }],
                prioritized_keywords_fields: Vec::new(),
            },
        }
    }

    /// A fresh definition for `name`.
    pub fn build_index(&self, name: &str) -> IndexDefinition {
        IndexDefinition {
            name: name.to_string(),
            fields: self.required_fields(),
            vector_search: Some(Self::vector_search()),
            semantic: Some(SemanticSearch {
                configurations: vec![Self::semantic_configuration()],
                other: Default::default(),
            }),
            other: Default::default(),
        }
    }

    /// Create or additively extend each index. Safe to re-run.
    pub async fn ensure_indexes(&self, names: &[String]) -> Result<()> {
        for name in names {
            match self.service.get_index(name).await? {
                None => {
                    self.service.create_index(&self.build_index(name)).await?;
                    self.observer
                        .report(SyncEvent::IndexCreated { index: name.clone() });
                }
                Some(existing) => {
                    let added = self.extend(existing).await?;
                    if added.is_empty() {
                        self.observer
                            .report(SyncEvent::IndexExists { index: name.clone() });
                    }
                    for field in added {
                        self.observer.report(SyncEvent::FieldAdded {
                            index: name.clone(),
                            field,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Diff an existing index against the required schema and push additive
    /// changes. Returns the names of added fields.
    async fn extend(&self, mut existing: IndexDefinition) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for required in self.required_fields() {
            match existing.field(&required.name) {
                Some(current) => check_compatible(&existing.name, current, &required)?,
                None => {
                    added.push(required.name.clone());
                    existing.fields.push(required);
                }
            }
        }

        let mut changed = !added.is_empty();
        changed |= merge_vector_search(&mut existing);
        changed |= merge_semantic(&mut existing);

        if changed {
            tracing::info!(index = %existing.name, fields = ?added, "extending index schema");
            self.service.create_or_update_index(&existing).await?;
        }
        Ok(added)
    }
}

fn check_compatible(
    index: &str,
    current: &FieldDefinition,
    required: &FieldDefinition,
) -> Result<()> {
    if current.field_type != required.field_type {
        return Err(SyncError::SchemaConflict {
            index: index.to_string(),
            field: required.name.clone(),
            reason: format!(
                "type is {}, expected {}",
                current.field_type, required.field_type
            ),
        });
    }
    if required.dimensions.is_some() && current.dimensions != required.dimensions {
        return Err(SyncError::SchemaConflict {
            index: index.to_string(),
            field: required.name.clone(),
            reason: format!(
                "dimensions are {:?}, expected {:?}",
                current.dimensions, required.dimensions
            ),
        });
    }
    if required.key == Some(true) && current.key != Some(true) {
        return Err(SyncError::SchemaConflict {
            index: index.to_string(),
            field: required.name.clone(),
            reason: "field is not the index key".to_string(),
        });
    }
    Ok(())
}

/// Add the HNSW algorithm and vector profile if absent. Returns whether
/// anything changed.
fn merge_vector_search(index: &mut IndexDefinition) -> bool {
    let wanted = IndexSchemaManager::vector_search();
    let vs = index.vector_search.get_or_insert_with(|| VectorSearch {
        algorithms: Vec::new(),
        profiles: Vec::new(),
        other: Default::default(),
    });
    let mut changed = false;
    for algorithm in wanted.algorithms {
        if !vs.algorithms.iter().any(|a| a.name == algorithm.name) {
            vs.algorithms.push(algorithm);
            changed = true;
        }
    }
    for profile in wanted.profiles {
        if !vs.profiles.iter().any(|p| p.name == profile.name) {
            vs.profiles.push(profile);
            changed = true;
        }
    }
    changed
}

fn merge_semantic(index: &mut IndexDefinition) -> bool {
    let semantic = index.semantic.get_or_insert_with(|| SemanticSearch {
        configurations: Vec::new(),
        other: Default::default(),
    });
    if semantic
        .configurations
        .iter()
        .any(|c| c.name == SEMANTIC_CONFIG)
    {
        return false;
    }
    semantic
        .configurations
        .push(IndexSchemaManager::semantic_configuration());
    true
}
