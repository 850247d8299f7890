mod common;

use anyhow::Result;
use serde_json::{json, Value};

use inventory_api::audit::Actor;
use inventory_api::record::RecordError;
use inventory_api::session::{close_session, open_session};

use common::{folio, setup};

fn actions(rows: &[inventory_api::database::Row]) -> Vec<(String, String)> {
    rows.iter()
        .map(|row| {
            let table = row["table_name"].as_str().unwrap_or_default().to_string();
            let action = row["action"].as_str().unwrap_or_default().to_string();
            (table, action)
        })
        .collect()
}

#[tokio::test]
async fn create_fills_server_fields_and_audits() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let input = json!({ "description": "Steel filing cabinet", "id_brand": app.catalogs.brand });
    let article = articles.create(input, &app.actor).await?;

    assert_eq!(article.folio, folio(1));
    assert_eq!(article.location.as_deref(), Some("ALMACEN GENERAL"));
    assert!(article.active);
    assert_eq!(article.created_by, Some(app.actor.user_id));

    let audit = app.audit_rows().await?;
    assert_eq!(actions(&audit), vec![("tr_article".to_string(), "CREATE".to_string())]);
    assert_eq!(audit[0]["record_id"], json!(article.id_article));
    assert_eq!(audit[0]["session_id"], json!(app.actor.session_id));
    assert_eq!(audit[0]["before_state"], Value::Null);
    assert_eq!(audit[0]["after_state"]["description"], json!("Steel filing cabinet"));
    Ok(())
}

#[tokio::test]
async fn every_mutation_leaves_one_audit_entry() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let article = articles.create(json!({ "description": "Desk" }), &app.actor).await?;
    articles
        .update(article.id_article, json!({ "description": "Standing desk", "location": "B-12" }), &app.actor)
        .await?;
    articles.delete(article.id_article, &app.actor).await?;

    let audit = app.audit_rows().await?;
    let got: Vec<String> = actions(&audit).into_iter().map(|(_, action)| action).collect();
    assert_eq!(got, vec!["CREATE", "UPDATE", "DELETE"]);

    let update = &audit[1];
    assert_ne!(update["before_state"], update["after_state"]);
    assert_eq!(update["before_state"]["description"], json!("Desk"));
    assert_eq!(update["after_state"]["description"], json!("Standing desk"));
    assert_eq!(audit[2]["after_state"], json!({ "active": false }));
    Ok(())
}

#[tokio::test]
async fn unchanged_update_writes_nothing() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let article = articles.create(json!({ "description": "Lamp" }), &app.actor).await?;
    let same = articles.update(article.id_article, json!({ "description": "Lamp" }), &app.actor).await?;

    assert_eq!(same.updated_at, None);
    assert_eq!(app.audit_rows().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_is_soft() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let article = articles.create(json!({ "description": "Projector" }), &app.actor).await?;
    articles.delete(article.id_article, &app.actor).await?;

    assert!(matches!(articles.get(article.id_article, false).await, Err(RecordError::NotFound { .. })));
    let retired = articles.get(article.id_article, true).await?;
    assert!(!retired.active);
    assert_eq!(retired.updated_by, Some(app.actor.user_id));
    assert_eq!(app.count("tr_article", "id_article").await?, 1);

    // A second delete finds nothing active.
    assert!(matches!(articles.delete(article.id_article, &app.actor).await, Err(RecordError::NotFound { .. })));
    Ok(())
}

#[tokio::test]
async fn system_fields_are_refused() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    for field in ["active", "created_by", "id_article"] {
        let mut input = json!({ "description": "Chair" });
        input[field] = json!(1);
        let result = articles.create(input, &app.actor).await;
        assert!(matches!(result, Err(RecordError::SystemFieldNotAllowed(ref f)) if f == field), "{}", field);
    }
    assert_eq!(app.count("tr_article", "id_article").await?, 0);
    Ok(())
}

#[tokio::test]
async fn mutations_without_a_live_session_write_nothing() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let expired = open_session(&app.db, 42, chrono::Duration::hours(-1)).await?;
    let result = articles
        .create(json!({ "description": "Ghost" }), &Actor::new(42, expired.id_session))
        .await;
    assert!(matches!(result, Err(RecordError::Unauthenticated)));

    let unknown = articles.create(json!({ "description": "Ghost" }), &Actor::new(42, 9_999)).await;
    assert!(matches!(unknown, Err(RecordError::Unauthenticated)));

    let borrowed = articles
        .create(json!({ "description": "Ghost" }), &Actor::new(7, app.actor.session_id))
        .await;
    assert!(matches!(borrowed, Err(RecordError::Unauthenticated)));

    close_session(&app.db, app.actor.session_id).await?;
    let closed = articles.create(json!({ "description": "Ghost" }), &app.actor).await;
    assert!(matches!(closed, Err(RecordError::Unauthenticated)));

    assert_eq!(app.count("tr_article", "id_article").await?, 0);
    assert!(app.audit_rows().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn bulk_create_skips_the_audit_trail() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let inputs = (1..=3).map(|n| json!({ "description": format!("Shelf {}", n) })).collect();
    let written = articles.create_many(inputs, &app.actor).await?;
    assert_eq!(written, 3);

    let rows = app.rows("tr_article", "id_article").await?;
    let mut folios: Vec<&str> = rows.iter().filter_map(|r| r["folio"].as_str()).collect();
    folios.sort();
    assert_eq!(folios, vec![folio(1), folio(2), folio(3)]);
    assert!(app.audit_rows().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_catalog_reference_is_rejected() -> Result<()> {
    let app = setup().await?;
    let articles = app.state.orchestrator.articles();

    let result = articles
        .create(json!({ "description": "Bookcase", "id_brand": 404 }), &app.actor)
        .await;
    assert!(matches!(result, Err(RecordError::ForeignKeyViolated(ref f)) if f == "id_brand"));
    assert!(app.audit_rows().await?.is_empty());
    Ok(())
}
