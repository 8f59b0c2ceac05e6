//! Which plugins a query reaches

use super::fixtures::{CountingPlugin, StaticPlugin, engine_with, ready_registry, result_plugins};
use crate::dispatch::{DispatchOptions, select_targets};
use crate::plugin::Plugin;
use crate::query;
use kestrel_types::{PluginMetadata, Query};
use std::sync::Arc;

#[tokio::test]
async fn test_calc_scenario_dispatch_set() {
    let calculator = CountingPlugin::new();
    let websearch = CountingPlugin::new();
    let fileindex = CountingPlugin::new();

    let (engine, _rx) = engine_with(vec![
        (
            PluginMetadata::new("calculator").with_action_keyword(">"),
            calculator.clone() as Arc<dyn Plugin>,
        ),
        (
            PluginMetadata::new("websearch").global(),
            websearch.clone() as Arc<dyn Plugin>,
        ),
        (
            PluginMetadata::new("fileindex").with_action_keyword("f"),
            fileindex.clone() as Arc<dyn Plugin>,
        ),
    ]);

    let outcome = engine.run_query("> calc 2+2").await.unwrap();

    assert_eq!(outcome.query.action_keyword, ">");
    assert_eq!(outcome.query.search, "calc 2+2");
    assert_eq!(calculator.searches(), vec!["calc 2+2"]);
    assert_eq!(websearch.query_count(), 1);
    assert_eq!(fileindex.query_count(), 0);
    assert_eq!(
        result_plugins(&outcome.entries),
        vec!["calculator", "websearch"]
    );
}

#[tokio::test]
async fn test_disabled_plugins_never_invoked() {
    let disabled_global = CountingPlugin::new();
    let disabled_keyword = CountingPlugin::new();

    let (engine, _rx) = engine_with(vec![
        (
            PluginMetadata::new("web").global().disabled(),
            disabled_global.clone() as Arc<dyn Plugin>,
        ),
        (
            PluginMetadata::new("calc").with_action_keyword(">").disabled(),
            disabled_keyword.clone() as Arc<dyn Plugin>,
        ),
        (PluginMetadata::new("files").global(), StaticPlugin::titles(&["x"])),
    ]);

    for raw in ["report", "> 1+1", "calc", "  spaced  out ", ">"] {
        let outcome = engine.run_query(raw).await.unwrap();
        assert!(
            result_plugins(&outcome.entries).iter().all(|id| id == "files"),
            "only enabled plugins answer '{raw}'"
        );
    }
    assert_eq!(disabled_global.query_count(), 0);
    assert_eq!(disabled_keyword.query_count(), 0);
}

#[tokio::test]
async fn test_disabled_keyword_is_plain_text() {
    let web = CountingPlugin::new();
    let (engine, _rx) = engine_with(vec![
        (
            PluginMetadata::new("calc").with_action_keyword(">").disabled(),
            StaticPlugin::titles(&["4"]),
        ),
        (PluginMetadata::new("web").global(), web.clone() as Arc<dyn Plugin>),
    ]);

    let outcome = engine.run_query("> 2+2").await.unwrap();
    assert!(!outcome.query.is_keyword_scoped());
    assert_eq!(web.searches(), vec!["> 2+2"]);
}

#[tokio::test]
async fn test_unregistered_keyword_reaches_global_only() {
    let files = CountingPlugin::new();
    let web = CountingPlugin::new();
    let (engine, _rx) = engine_with(vec![
        (
            PluginMetadata::new("files").with_action_keyword("f"),
            files.clone() as Arc<dyn Plugin>,
        ),
        (PluginMetadata::new("web").global(), web.clone() as Arc<dyn Plugin>),
    ]);

    let outcome = engine.run_query("g rust async").await.unwrap();

    assert_eq!(outcome.query.action_keyword, "");
    assert_eq!(web.searches(), vec!["g rust async"]);
    assert_eq!(files.query_count(), 0);
    assert_eq!(result_plugins(&outcome.entries), vec!["web"]);
}

#[test]
fn test_unmatched_scoped_query_selects_global_only() {
    let registry = ready_registry(vec![
        (PluginMetadata::new("files").with_action_keyword("f"), StaticPlugin::empty()),
        (PluginMetadata::new("calc").with_action_keyword(">"), StaticPlugin::empty()),
        (PluginMetadata::new("web").global(), StaticPlugin::empty()),
        (PluginMetadata::new("apps").global(), StaticPlugin::empty()),
    ]);
    let query = Query {
        raw_text: "zz thing".to_string(),
        action_keyword: "zz".to_string(),
        search: "thing".to_string(),
    };

    let targets = select_targets(&registry.snapshot(), &query, &DispatchOptions::default());
    let ids: Vec<&str> = targets.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec!["web", "apps"]);
}

#[tokio::test]
async fn test_empty_input_queries_nobody() {
    let web = CountingPlugin::new();
    let (engine, _rx) = engine_with(vec![(
        PluginMetadata::new("web").global(),
        web.clone() as Arc<dyn Plugin>,
    )]);

    let outcome = engine.run_query("   ").await.unwrap();
    assert!(outcome.entries.is_empty());
    assert!(outcome.warnings.is_empty());
    assert_eq!(web.query_count(), 0);
}

#[tokio::test]
async fn test_bare_keyword_dispatches_with_empty_search() {
    let calc = CountingPlugin::new();
    let (engine, _rx) = engine_with(vec![(
        PluginMetadata::new("calc").with_action_keyword(">"),
        calc.clone() as Arc<dyn Plugin>,
    )]);

    engine.run_query(">").await.unwrap();
    assert_eq!(calc.searches(), vec![""]);
}

#[tokio::test]
async fn test_keyword_edit_applies_to_next_query() {
    let calc = CountingPlugin::new();
    let (engine, _rx) = engine_with(vec![(
        PluginMetadata::new("calc").with_action_keyword(">"),
        calc.clone() as Arc<dyn Plugin>,
    )]);

    engine.run_query("> 1").await.unwrap();
    engine.registry().set_action_keyword("calc", "=").unwrap();
    engine.run_query("> 2").await.unwrap();
    engine.run_query("= 3").await.unwrap();

    assert_eq!(calc.searches(), vec!["1", "3"]);
}

#[test]
fn test_keyword_of_initializing_plugin_routes_nowhere() {
    let registry = ready_registry(vec![(
        PluginMetadata::new("web").global(),
        StaticPlugin::empty(),
    )]);
    registry
        .register(
            PluginMetadata::new("calc").with_action_keyword(">"),
            StaticPlugin::empty(),
        )
        .unwrap();
    registry.begin_initialize("calc").unwrap();

    let snapshot = registry.snapshot();
    let query = query::parse("> 2+2", snapshot.keywords());
    assert_eq!(query.action_keyword, ">");

    let targets = select_targets(&snapshot, &query, &DispatchOptions::default());
    let ids: Vec<&str> = targets.iter().map(|t| t.id()).collect();
    assert_eq!(ids, vec!["web"]);
}
