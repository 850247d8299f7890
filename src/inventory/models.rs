use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::record::{Entity, Record, RecordError};
use crate::storage::{FileUpload, StoredFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Intake: articles enter the inventory.
    Alta,
    /// Decommission: articles leave it.
    Baja,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Alta => "alta",
            OperationKind::Baja => "baja",
        }
    }

    /// Storage domain attachments of this kind are filed under.
    pub fn storage_domain(&self) -> &'static str {
        match self {
            OperationKind::Alta => "intake",
            OperationKind::Baja => "decommission",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only reference tables an article or operation points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Catalog {
    ArticleType,
    Brand,
    Material,
    Color,
    Supplier,
    Condition,
    OperationType,
}

impl Catalog {
    pub const ARTICLE_CATALOGS: [Catalog; 6] = [
        Catalog::ArticleType,
        Catalog::Brand,
        Catalog::Material,
        Catalog::Color,
        Catalog::Supplier,
        Catalog::Condition,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Catalog::ArticleType => "ct_inventory_article_type",
            Catalog::Brand => "ct_inventory_brand",
            Catalog::Material => "ct_inventory_material",
            Catalog::Color => "ct_inventory_color",
            Catalog::Supplier => "ct_inventory_supplier",
            Catalog::Condition => "ct_inventory_condition",
            Catalog::OperationType => "ct_inventory_operation_type",
        }
    }

    /// Referencing column on the article (or operation) row.
    pub fn field(&self) -> &'static str {
        match self {
            Catalog::ArticleType => "id_article_type",
            Catalog::Brand => "id_brand",
            Catalog::Material => "id_material",
            Catalog::Color => "id_color",
            Catalog::Supplier => "id_supplier",
            Catalog::Condition => "id_condition",
            Catalog::OperationType => "id_operation_type",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Catalog::ArticleType => "article type",
            Catalog::Brand => "brand",
            Catalog::Material => "material",
            Catalog::Color => "color",
            Catalog::Supplier => "supplier",
            Catalog::Condition => "condition",
            Catalog::OperationType => "operation type",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id_article: i64,
    pub folio: String,
    pub description: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub cost: Option<Decimal>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub observations: Option<String>,
    #[serde(default)]
    pub id_article_type: Option<i64>,
    #[serde(default)]
    pub id_brand: Option<i64>,
    #[serde(default)]
    pub id_material: Option<i64>,
    #[serde(default)]
    pub id_color: Option<i64>,
    #[serde(default)]
    pub id_supplier: Option<i64>,
    #[serde(default)]
    pub id_condition: Option<i64>,
    pub active: bool,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Article {
    const TABLE: &'static str = "tr_article";
    const REQUIRED: &'static [&'static str] = &["folio", "description"];
}

/// Parent row of one Alta or Baja submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationHeader {
    pub id_operation: i64,
    pub kind: OperationKind,
    pub id_operation_type: i64,
    #[serde(default)]
    pub observations: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for OperationHeader {
    const TABLE: &'static str = "tr_operation";
    const REQUIRED: &'static [&'static str] = &["kind", "id_operation_type"];
}

impl OperationHeader {
    pub fn record(kind: OperationKind, operation_type: i64, observations: Option<&str>) -> Record {
        let mut record = Record::new();
        record
            .set("kind", kind.as_str())
            .set("id_operation_type", operation_type)
            .set("observations", observations.map(str::to_string));
        record
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationArticleLink {
    pub id_operation_article: i64,
    pub id_operation: i64,
    pub id_article: i64,
    pub active: bool,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for OperationArticleLink {
    const TABLE: &'static str = "rel_operation_article";
    const AUDITED: bool = false;
    const REQUIRED: &'static [&'static str] = &["id_operation", "id_article"];
}

impl OperationArticleLink {
    pub fn record(operation_id: i64, article_id: i64) -> Record {
        let mut record = Record::new();
        record.set("id_operation", operation_id).set("id_article", article_id);
        record
    }
}

/// Metadata of a stored attachment; the bytes live in the file store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id_operation_file: i64,
    pub id_operation: i64,
    pub original_name: String,
    pub stored_name: String,
    pub storage_path: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub checksum: Option<String>,
    pub active: bool,
    #[serde(default)]
    pub created_by: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Entity for AttachedFile {
    const TABLE: &'static str = "tr_operation_file";
    const REQUIRED: &'static [&'static str] = &["id_operation", "original_name", "stored_name", "storage_path"];
}

impl AttachedFile {
    pub fn record(operation_id: i64, upload: &FileUpload, stored: &StoredFile) -> Record {
        let mut record = Record::new();
        record
            .set("id_operation", operation_id)
            .set("original_name", upload.original_name.clone())
            .set("stored_name", stored.stored_name.clone())
            .set("storage_path", stored.path.clone())
            .set("mime_type", stored.mime_type.clone())
            .set("size_bytes", stored.size_bytes)
            .set("checksum", stored.checksum.clone());
        record
    }
}

/// One article of an Alta submission. Folio, location default and actor
/// columns are filled by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArticleInput {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_article_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_brand: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_material: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_color: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_supplier: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_condition: Option<i64>,
}

impl ArticleInput {
    pub fn new(description: impl Into<String>) -> Self {
        Self { description: description.into(), ..Default::default() }
    }

    /// Catalog references this article carries.
    pub fn catalog_refs(&self) -> Vec<(Catalog, i64)> {
        let ids = [
            self.id_article_type,
            self.id_brand,
            self.id_material,
            self.id_color,
            self.id_supplier,
            self.id_condition,
        ];
        Catalog::ARTICLE_CATALOGS
            .iter()
            .zip(ids)
            .filter_map(|(catalog, id)| id.map(|id| (*catalog, id)))
            .collect()
    }

    pub fn to_record(&self, key: &str) -> Result<Record, RecordError> {
        let value = serde_json::to_value(self).map_err(|e| RecordError::InvalidInput(e.to_string()))?;
        Record::from_input(value, key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AltaInput {
    pub catalog_type_id: i64,
    #[serde(default)]
    pub observations: Option<String>,
    pub articles: Vec<ArticleInput>,
    #[serde(skip)]
    pub file: Option<FileUpload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BajaInput {
    pub catalog_type_id: i64,
    #[serde(default)]
    pub observations: Option<String>,
    pub article_ids: Vec<i64>,
    #[serde(skip)]
    pub file: Option<FileUpload>,
}

/// Everything one committed submission produced, articles in folio order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub header: OperationHeader,
    pub articles: Vec<Article>,
    pub links: Vec<OperationArticleLink>,
    pub file: AttachedFile,
    pub summary: String,
}
