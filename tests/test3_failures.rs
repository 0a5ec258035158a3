use std::sync::Arc;

use sql_hydrate::prelude::*;
use sql_hydrate::sourcing::{
    PurchaseOrder, PurchaseOrderAlias, PurchaseOrderOptions, new_purchase_order_builder,
};
use sql_hydrate::test_utils::{FaultyExecutor, RecordingExecutor, SourcingDb};
use tokio::runtime::Runtime;

fn admin() -> PurchaseOrderOptions {
    PurchaseOrderOptions {
        role: Role::Admin,
        ..PurchaseOrderOptions::default()
    }
}

#[test]
fn failed_relation_leaves_the_others_hydrated() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let faulty = FaultyExecutor::failing(db.executor(), "FROM purchase_order_trackings");
        let ctx = RequestContext::new(Arc::new(faulty), EngineConfig::default());

        let options = PurchaseOrderOptions {
            include_items: true,
            include_trackings: true,
            include_invoice: true,
            ..admin()
        };
        let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await?;

        assert_eq!(page.total_record, Some(7));
        assert_eq!(page.records.len(), 7);
        assert!(page.hydration.failed("trackings"));
        assert!(!page.hydration.is_clean());
        assert_eq!(page.hydration.fetched, vec!["items", "invoice"]);

        let po1 = page
            .records
            .iter()
            .find(|po| po.id == "po-1")
            .ok_or("po-1 missing")?;
        assert!(po1.trackings.is_empty());
        assert_eq!(po1.items.len(), 2);
        assert!(po1.invoice.is_some());
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn undecodable_related_rows_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        db.pools
            .dml(
                "INSERT INTO purchase_order_trackings (id, purchase_order_id, action, created_at) \
                 VALUES (?, ?, ?, ?)",
                &[
                    RowValues::Text("t-bad".into()),
                    RowValues::Text("po-1".into()),
                    RowValues::Text("refunded".into()),
                    RowValues::Text("not a timestamp".into()),
                ],
            )
            .await?;
        let ctx = db.context();

        let options = PurchaseOrderOptions {
            include_trackings: true,
            ..admin()
        };
        let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await?;
        assert!(page.hydration.is_clean());
        assert_eq!(page.hydration.fetched, vec!["trackings"]);

        let po1 = page
            .records
            .iter()
            .find(|po| po.id == "po-1")
            .ok_or("po-1 missing")?;
        let actions: Vec<&str> = po1.trackings.iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["created", "paid"]);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn nested_failures_stay_inside_the_nested_query() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let faulty = FaultyExecutor::failing(db.executor(), "FROM addresses");
        let ctx = RequestContext::new(Arc::new(faulty), EngineConfig::default());

        let options = PurchaseOrderOptions {
            include_inquiry: true,
            include_inquiry_address: true,
            ..admin()
        };
        let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await?;
        assert!(page.hydration.is_clean());

        let po1 = page
            .records
            .iter()
            .find(|po| po.id == "po-1")
            .ok_or("po-1 missing")?;
        let inquiry = po1.inquiry.as_ref().ok_or("inquiry missing")?;
        assert_eq!(inquiry.id, "iq-A");
        assert!(inquiry.shipping_address.is_none());
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn count_or_main_failure_fails_the_page() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;

        for needle in ["SELECT COUNT(1)", "FROM purchase_orders po"] {
            let faulty = FaultyExecutor::failing(db.executor(), needle);
            let ctx = RequestContext::new(Arc::new(faulty), EngineConfig::default());
            let result = Query::new(&ctx, new_purchase_order_builder(&admin())?)
                .paginate()
                .await;
            assert!(
                matches!(result, Err(HydrateError::ExecutionError(_))),
                "{needle}: {result:?}"
            );
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn nesting_beyond_max_depth_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let options = PurchaseOrderOptions {
            include_inquiry: true,
            include_inquiry_address: true,
            ..admin()
        };

        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let shallow = EngineConfig {
            max_depth: 1,
            ..EngineConfig::default()
        };
        let ctx = RequestContext::new(recorder.clone(), shallow);
        let result = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await;
        assert!(matches!(result, Err(HydrateError::CompositionError(_))));
        assert!(recorder.matching("FROM addresses").is_empty());

        let deep_enough = EngineConfig {
            max_depth: 2,
            ..EngineConfig::default()
        };
        let ctx = RequestContext::new(db.executor(), deep_enough);
        let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await?;
        assert!(page.hydration.is_clean());
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn runtime_cycle_is_rejected_before_the_nested_statement() -> Result<(), Box<dyn std::error::Error>>
{
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        // no `nests` declaration, so only the request lineage can catch this
        let siblings = RelationTask::<PurchaseOrder, String, PurchaseOrder>::new("siblings", true)
            .key(|po| po.inquiry_id.clone())
            .fetch(|ctx, ids| async move {
                let spec = new_purchase_order_builder(&admin())?;
                Query::new(&ctx, spec)
                    .filter_in("po.inquiry_id", &ids)
                    .find()
                    .await
            })
            .match_any(|po| po.inquiry_id.iter().cloned().collect())
            .attach(|_po, _found| {})
            .into_relation();
        let spec = QuerySpec::<PurchaseOrder>::builder("purchase_orders")
            .raw_sql("SELECT po.* FROM purchase_orders po")
            .order_by(&["po.id"])
            .decode_as::<PurchaseOrderAlias>()
            .relation(siblings)
            .build()?;

        let result = Query::new(&ctx, spec).find().await;
        assert!(matches!(result, Err(HydrateError::CompositionError(_))));
        assert_eq!(recorder.statements().len(), 1);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn build_errors_surface_before_any_statement() -> Result<(), Box<dyn std::error::Error>> {
    let guest = new_purchase_order_builder(&PurchaseOrderOptions::default());
    assert!(matches!(guest, Err(HydrateError::ConfigError(_))));

    let unterminated = QuerySpec::<PurchaseOrder>::builder("purchase_orders")
        .raw_sql("SELECT po.* FROM purchase_orders po {{ if .include_users }}")
        .options(&admin())
        .decode_as::<PurchaseOrderAlias>()
        .build();
    assert!(matches!(unterminated, Err(HydrateError::TemplateError { .. })));

    let unknown_field = QuerySpec::<PurchaseOrder>::builder("purchase_orders")
        .raw_sql("SELECT po.* FROM purchase_orders po WHERE {{ .no_such_option }}")
        .options(&admin())
        .decode_as::<PurchaseOrderAlias>()
        .build();
    assert!(matches!(unknown_field, Err(HydrateError::TemplateError { .. })));

    let self_nesting = QuerySpec::<PurchaseOrder>::builder("purchase_orders")
        .raw_sql("SELECT po.* FROM purchase_orders po")
        .decode_as::<PurchaseOrderAlias>()
        .relation(
            RelationTask::<PurchaseOrder, String, PurchaseOrder>::new("children", true)
                .key(|po| Some(po.id.clone()))
                .fetch(|_ctx, _ids| async move { Ok(Vec::new()) })
                .match_on(|po| po.id.clone())
                .attach(|_po, _found| {})
                .nests("purchase_orders")
                .into_relation(),
        )
        .build();
    assert!(matches!(self_nesting, Err(HydrateError::CompositionError(_))));
    Ok(())
}
