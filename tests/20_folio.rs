mod common;

use std::collections::HashSet;

use anyhow::Result;
use serde_json::json;

use common::{folio, setup};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batches_never_share_a_folio() -> Result<()> {
    let app = setup().await?;

    let mut handles = Vec::new();
    for batch in 0..4 {
        let orchestrator = app.state.orchestrator.clone();
        let actor = app.actor;
        let input = app.alta((0..3).map(|n| app.article(&format!("Batch {} item {}", batch, n))).collect());
        handles.push(tokio::spawn(async move { orchestrator.create_alta_batch(input, &actor).await }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let result = handle.await??;
        for article in result.articles {
            assert!(seen.insert(article.folio.clone()), "folio {} issued twice", article.folio);
        }
    }

    let expected: HashSet<String> = (1..=12).map(folio).collect();
    assert_eq!(seen, expected);
    Ok(())
}

#[tokio::test]
async fn batch_folios_are_contiguous_within_a_batch() -> Result<()> {
    let app = setup().await?;

    let (first, second) = tokio::join!(
        app.state.orchestrator.create_alta_batch(app.alta(vec![app.article("A"), app.article("B")]), &app.actor),
        app.state.orchestrator.create_alta_batch(app.alta(vec![app.article("C"), app.article("D")]), &app.actor),
    );

    for result in [first?, second?] {
        let sequences: Vec<u32> = result
            .articles
            .iter()
            .map(|a| inventory_api::folio::parse(&a.folio).map(|f| f.sequence))
            .collect::<Result<_, _>>()?;
        assert_eq!(sequences[1], sequences[0] + 1);
    }
    Ok(())
}

#[tokio::test]
async fn sequence_continues_from_the_highest_stored_folio() -> Result<()> {
    let app = setup().await?;
    app.seed_article(&folio(10)).await?;
    app.seed_article(&folio(4)).await?;
    // Other years and prefixes do not count.
    app.seed_article(&format!("INV-{}-0000900", common::year() - 1)).await?;
    app.seed_article(&format!("OLD-{}-0000700", common::year())).await?;

    let article = app
        .state
        .orchestrator
        .articles()
        .create(json!({ "description": "Whiteboard" }), &app.actor)
        .await?;
    assert_eq!(article.folio, folio(11));
    Ok(())
}

#[tokio::test]
async fn duplicate_caller_folio_is_a_conflict() -> Result<()> {
    let app = setup().await?;
    app.seed_article(&folio(3)).await?;

    let articles = app.state.orchestrator.articles();
    let lowercase = folio(3).to_lowercase();
    let result = articles.create(json!({ "description": "Copy", "folio": lowercase }), &app.actor).await;
    assert!(matches!(
        result,
        Err(inventory_api::record::RecordError::UniqueConstraintViolated(ref f)) if f == "folio"
    ));
    Ok(())
}
