use std::sync::Arc;
use std::time::Duration;

use sql_hydrate::prelude::*;
use sql_hydrate::sourcing::{
    InquiryOptions, PurchaseOrder, PurchaseOrderOptions, new_inquiry_builder,
    new_purchase_order_builder,
};
use sql_hydrate::test_utils::{InFlightExecutor, RecordingExecutor, SourcingDb};
use tokio::runtime::Runtime;

fn admin() -> PurchaseOrderOptions {
    PurchaseOrderOptions {
        role: Role::Admin,
        ..PurchaseOrderOptions::default()
    }
}

fn everything() -> PurchaseOrderOptions {
    PurchaseOrderOptions {
        include_users: true,
        include_items: true,
        include_inquiry: true,
        include_inquiry_address: true,
        include_trackings: true,
        include_assignees: true,
        include_sample_maker: true,
        include_invoice: true,
        ..admin()
    }
}

fn by_id<'a>(records: &'a [PurchaseOrder], id: &str) -> Option<&'a PurchaseOrder> {
    records.iter().find(|po| po.id == id)
}

#[test]
fn shared_keys_are_fetched_once() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        let options = PurchaseOrderOptions {
            include_inquiry: true,
            ..admin()
        };
        let ids = vec!["po-1".to_string(), "po-2".to_string(), "po-3".to_string()];
        let records = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .filter_in("po.id", &ids)
            .find()
            .await?;
        assert_eq!(records.len(), 3);

        let inquiries = recorder.matching("FROM inquiries iq");
        assert_eq!(inquiries.len(), 1);
        assert_eq!(
            inquiries[0].params,
            vec![RowValues::Text("iq-A".into()), RowValues::Text("iq-B".into())]
        );

        let inquiry_of = |id: &str| {
            by_id(&records, id)
                .and_then(|po| po.inquiry.as_ref())
                .map(|iq| iq.id.clone())
        };
        assert_eq!(inquiry_of("po-1").as_deref(), Some("iq-A"));
        assert_eq!(inquiry_of("po-2").as_deref(), Some("iq-A"));
        assert_eq!(inquiry_of("po-3").as_deref(), Some("iq-B"));
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn disabled_relations_issue_no_statements() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        let page = Query::new(&ctx, new_purchase_order_builder(&admin())?)
            .paginate()
            .await?;
        assert_eq!(page.records.len(), 7);
        assert!(page.hydration.fetched.is_empty());

        // main + count only
        let statements = recorder.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements.iter().all(|s| s.sql.contains("FROM purchase_orders po")));

        for po in &page.records {
            assert!(po.user.is_none());
            assert!(po.inquiry.is_none());
            assert!(po.items.is_empty());
            assert!(po.trackings.is_empty());
            assert!(po.assignees.is_empty());
            assert!(po.invoice.is_none());
            assert!(po.sample_maker.is_none());
        }
        let po2 = by_id(&page.records, "po-2").ok_or("po-2 missing")?;
        assert_eq!(po2.sample_maker_id.as_deref(), Some("inflow"));
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn every_relation_attaches_to_the_right_record() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let ctx = db.context();

        let page = Query::new(&ctx, new_purchase_order_builder(&everything())?)
            .paginate()
            .await?;
        assert!(page.hydration.is_clean());
        assert_eq!(page.hydration.fetched.len(), 6);

        let po1 = by_id(&page.records, "po-1").ok_or("po-1 missing")?;
        assert_eq!(po1.user.as_ref().map(|u| u.name.as_str()), Some("Buyer One"));
        let skus: Vec<&str> = po1.items.iter().map(|i| i.sku.as_str()).collect();
        assert_eq!(skus, vec!["SKU-LINEN-S", "SKU-LINEN-M"]);
        let actions: Vec<&str> = po1.trackings.iter().map(|t| t.action.as_str()).collect();
        assert_eq!(actions, vec!["created", "paid"]);
        let assignees: Vec<&str> = po1.assignees.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(assignees, vec!["u-staff1", "u-staff2"]);
        assert_eq!(
            po1.sample_maker.as_ref().map(|u| u.name.as_str()),
            Some("Seller One")
        );
        assert_eq!(po1.invoice.as_ref().map(|i| i.status.as_str()), Some("paid"));
        let inquiry = po1.inquiry.as_ref().ok_or("po-1 inquiry missing")?;
        assert_eq!(inquiry.title, "Linen shirts");
        assert_eq!(
            inquiry.shipping_address.as_ref().map(|a| a.city.as_str()),
            Some("Hanoi")
        );

        let po2 = by_id(&page.records, "po-2").ok_or("po-2 missing")?;
        assert_eq!(
            po2.sample_maker.as_ref().map(|u| u.name.as_str()),
            Some("Inflow Sample Room")
        );
        assert!(po2.invoice.is_none());
        assert_eq!(po2.items.len(), 1);

        let po4 = by_id(&page.records, "po-4").ok_or("po-4 missing")?;
        assert!(po4.inquiry.is_none());
        assert!(po4.sample_maker.is_none());
        assert!(po4.items.is_empty());
        assert!(po4.assignees.is_empty());

        let po5 = by_id(&page.records, "po-5").ok_or("po-5 missing")?;
        let inquiry = po5.inquiry.as_ref().ok_or("po-5 inquiry missing")?;
        assert_eq!(inquiry.id, "iq-C");
        assert!(inquiry.shipping_address.is_none());
        assert_eq!(po5.invoice.as_ref().map(|i| i.invoice_number), Some(1003));
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn in_house_sample_maker_is_never_queried() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        let options = PurchaseOrderOptions {
            include_sample_maker: true,
            ..admin()
        };
        Query::new(&ctx, new_purchase_order_builder(&options)?)
            .paginate()
            .await?;

        let lookups = recorder.matching("FROM users u WHERE");
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].params, vec![RowValues::Text("u-seller1".into())]);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn in_house_only_page_attaches_without_a_lookup() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        let options = PurchaseOrderOptions {
            include_sample_maker: true,
            ..admin()
        };
        let page = Query::new(&ctx, new_purchase_order_builder(&options)?)
            .filter("po.id = ?", vec!["po-2".into()])
            .paginate()
            .await?;
        assert!(page.hydration.is_clean());
        let po2 = by_id(&page.records, "po-2").ok_or("po-2 missing")?;
        assert_eq!(
            po2.sample_maker.as_ref().map(|u| u.name.as_str()),
            Some("Inflow Sample Room")
        );
        assert!(recorder.matching("FROM users").is_empty());
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn statements_in_flight_never_exceed_the_cap() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        for cap in [1, 2] {
            let gauge = Arc::new(InFlightExecutor::new(
                db.executor(),
                Duration::from_millis(25),
            ));
            let config = EngineConfig {
                relation_concurrency: Some(cap),
                ..EngineConfig::default()
            };
            let ctx = RequestContext::new(gauge.clone(), config);

            let page = Query::new(&ctx, new_purchase_order_builder(&everything())?)
                .paginate()
                .await?;
            assert!(page.hydration.is_clean());
            assert_eq!(page.records.len(), 7);
            assert!(gauge.peak() <= cap, "cap {cap}, peak {}", gauge.peak());
            // count and main start together whenever two permits exist
            assert_eq!(gauge.peak(), cap);
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn inquiries_hydrate_their_purchase_orders() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let ctx = db.context();

        let options = InquiryOptions {
            role: Role::Staff,
            include_user: true,
            include_purchase_orders: true,
            ..InquiryOptions::default()
        };
        let page = Query::new(&ctx, new_inquiry_builder(&options)?)
            .paginate()
            .await?;
        assert_eq!(page.total_record, Some(3));

        let iq_a = page
            .records
            .iter()
            .find(|iq| iq.id == "iq-A")
            .ok_or("iq-A missing")?;
        assert_eq!(iq_a.user.as_ref().map(|u| u.id.as_str()), Some("u-buyer1"));
        let orders: Vec<&str> = iq_a.purchase_orders.iter().map(|po| po.id.as_str()).collect();
        assert_eq!(orders, vec!["po-7", "po-2", "po-1"]);
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}

#[test]
fn consistent_read_pins_every_statement_to_primary() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = SourcingDb::seeded().await?;
        let recorder = Arc::new(RecordingExecutor::new(db.executor()));
        let ctx = RequestContext::new(recorder.clone(), EngineConfig::default());

        Query::new(&ctx, new_purchase_order_builder(&everything())?)
            .paginate()
            .await?;
        let statements = recorder.statements();
        assert!(statements.len() > 2);
        assert!(statements.iter().all(|s| s.routing == ReadRouting::Replica));

        recorder.clear();
        let pinned = PurchaseOrderOptions {
            consistent_read: true,
            ..everything()
        };
        Query::new(&ctx, new_purchase_order_builder(&pinned)?)
            .paginate()
            .await?;
        let statements = recorder.statements();
        assert!(statements.len() > 2);
        assert!(statements.iter().all(|s| s.routing == ReadRouting::Primary));
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
