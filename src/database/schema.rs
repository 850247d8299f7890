use super::memory::TableDef;

const ACTOR_COLUMNS: &[&str] = &["active", "created_by", "created_at"];

/// Constraint mirror of `migrations/0001_inventory.sql` for the in-memory backend.
pub fn table_defs() -> Vec<TableDef> {
    let catalogs = [
        ("ct_inventory_article_type", "id_article_type"),
        ("ct_inventory_brand", "id_brand"),
        ("ct_inventory_material", "id_material"),
        ("ct_inventory_color", "id_color"),
        ("ct_inventory_supplier", "id_supplier"),
        ("ct_inventory_condition", "id_condition"),
    ];

    let mut defs: Vec<TableDef> = catalogs
        .iter()
        .map(|(name, key)| TableDef::new(name, key).not_null(&["name"]))
        .collect();

    defs.push(TableDef::new("ct_inventory_operation_type", "id_operation_type").not_null(&["name", "kind"]));

    defs.push(
        TableDef::new("tr_session", "id_session")
            .not_null(&["user_id", "active", "expires_at"]),
    );

    defs.push(
        TableDef::new("tr_article", "id_article")
            .unique("folio")
            .not_null(&["folio", "description"])
            .not_null(ACTOR_COLUMNS)
            .references("id_article_type", "ct_inventory_article_type")
            .references("id_brand", "ct_inventory_brand")
            .references("id_material", "ct_inventory_material")
            .references("id_color", "ct_inventory_color")
            .references("id_supplier", "ct_inventory_supplier")
            .references("id_condition", "ct_inventory_condition"),
    );

    defs.push(
        TableDef::new("tr_operation", "id_operation")
            .not_null(&["kind", "id_operation_type"])
            .not_null(ACTOR_COLUMNS)
            .references("id_operation_type", "ct_inventory_operation_type"),
    );

    defs.push(
        TableDef::new("rel_operation_article", "id_operation_article")
            .not_null(&["id_operation", "id_article"])
            .references("id_operation", "tr_operation")
            .references("id_article", "tr_article"),
    );

    defs.push(
        TableDef::new("tr_operation_file", "id_operation_file")
            .not_null(&["id_operation", "original_name", "stored_name", "storage_path"])
            .references("id_operation", "tr_operation"),
    );

    defs.push(
        TableDef::new("tr_audit_log", "id_audit_log")
            .not_null(&["table_name", "action", "record_id", "actor_id", "session_id", "created_at"])
            .references("session_id", "tr_session"),
    );

    defs
}
