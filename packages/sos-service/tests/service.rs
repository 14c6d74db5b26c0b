use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use sos_config::Search;
use sos_domain::{
	ResourceLimit,
	aggregation::AggregationType,
	filter::{
		DeterminationFilter, Filter, NotPresentFilter, NotRecoveredFilter, NumericFilter,
		SearchFilter, SearchFilterInternal, StatusValidation, TaxonFilter, UnspontaneousFilter,
	},
	geo::{LatLonBoundingBox, LatLonCoordinate},
	taxon_tree::{TaxonRelation, TaxonTree},
};
use sos_service::{
	AggregationRequest, Collaborators, Error, FixedInstance, GeoTileTaxaRequest, SearchRequest,
	SosService, StaticTaxonTree, TaxonAggregationRequest, query,
};
use sos_testkit::{EngineCall, FakeEngine, composite_response, search_response, serve_composite};

#[derive(Debug, Deserialize)]
struct ObservationHit {
	occurrence_id: String,
}

fn relation(taxon_id: i32, parent_id: Option<i32>) -> TaxonRelation {
	TaxonRelation { taxon_id, parent_id, secondary_parent_ids: Vec::new() }
}

// Biota (0) with 42 -> {43, 44} and an unrelated 7.
fn tree() -> TaxonTree {
	TaxonTree::build([
		relation(0, None),
		relation(42, Some(0)),
		relation(43, Some(42)),
		relation(44, Some(42)),
		relation(7, Some(0)),
	])
	.expect("Failed to build taxon tree.")
}

fn service_with(engine: Arc<FakeEngine>, cfg: Search, instance: i16) -> SosService {
	SosService::new(
		cfg,
		"sos",
		Collaborators::new(
			engine,
			Arc::new(FixedInstance(instance)),
			Arc::new(StaticTaxonTree::new(tree())),
		),
	)
}

fn service(engine: Arc<FakeEngine>) -> SosService {
	service_with(engine, Search::default(), 0)
}

fn taxa_filter(ids: &[i32], include_underlying_taxa: bool) -> Filter {
	Filter::from(SearchFilter {
		taxa: Some(TaxonFilter { ids: ids.to_vec(), include_underlying_taxa }),
		..Default::default()
	})
}

fn sweden() -> LatLonBoundingBox {
	LatLonBoundingBox::new(LatLonCoordinate::new(69.1, 10.9), LatLonCoordinate::new(55.3, 24.2))
}

/// Taxon ids of the `terms` clause on `taxon.id`, if the query restricts taxa.
fn requested_taxa(body: &Value) -> Option<Vec<i64>> {
	body["query"]["bool"]["filter"].as_array()?.iter().find_map(|clause| {
		clause["terms"]["taxon.id"]
			.as_array()
			.map(|ids| ids.iter().filter_map(Value::as_i64).collect())
	})
}

fn taxon_bucket(taxon_id: i64, doc_count: u64) -> Value {
	json!({
		"key": { "taxon_id": taxon_id },
		"doc_count": doc_count,
		"first_sighting": { "value": null },
		"last_sighting": { "value": null },
	})
}

#[tokio::test]
async fn inactive_filter_counts_and_aggregates_nothing_without_engine_calls() {
	let engine = Arc::new(FakeEngine::empty());
	let service = service(engine.clone());
	let count = service.count(&Filter::default()).await.expect("Count failed.");
	let aggregated = service
		.aggregate(&AggregationRequest {
			filter: Filter::from(SearchFilterInternal::default()),
			aggregation_type: AggregationType::SpeciesSightingsList,
			skip: 0,
			take: 10,
		})
		.await
		.expect("Aggregate failed.")
		.expect("Aggregate should not hit a limit.");

	assert_eq!(count, 0);
	assert!(aggregated.records.is_empty());
	assert_eq!(aggregated.total_count, 0);
	assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn count_targets_the_resolved_index_scope() {
	let engine = Arc::new(FakeEngine::new(|_| Ok(json!({ "count": 17 }))));
	let service = service_with(engine.clone(), Search::default(), 3);
	let filter = Filter::from(SearchFilterInternal {
		base: SearchFilter { project_ids: vec![5], ..Default::default() },
		include_protected: true,
		..Default::default()
	});

	assert_eq!(service.count(&filter).await.expect("Count failed."), 17);
	assert_eq!(engine.calls()[0].index(), "sos-observation-3,sos-observation-protected-3");
}

#[tokio::test]
async fn search_beyond_the_window_is_a_limit_failure() {
	let engine = Arc::new(FakeEngine::empty());
	let service = service(engine.clone());
	let result = service
		.search::<ObservationHit>(&SearchRequest { skip: 9_990, take: 20, ..Default::default() })
		.await
		.expect("Search failed.");
	let limit = result.expect_err("Expected a result window failure.");

	assert_eq!(limit.limit, ResourceLimit::ResultWindow { max: 10_000 });
	assert_eq!(engine.call_count(), 0);
}

#[tokio::test]
async fn search_recounts_when_the_estimate_is_capped() {
	let engine = Arc::new(FakeEngine::new(|call| {
		Ok(match call {
			EngineCall::Count { .. } => json!({ "count": 123_456 }),
			EngineCall::Search { .. } => search_response(10_000, "gte", &[
				json!({ "occurrence_id": "urn:1" }),
				json!({ "occurrence_id": "urn:2" }),
			]),
		})
	}));
	let service = service(engine.clone());
	let page = service
		.search::<ObservationHit>(&SearchRequest {
			filter: taxa_filter(&[42], false),
			take: 2,
			..Default::default()
		})
		.await
		.expect("Search failed.")
		.expect("Search should stay within the window.");
	let calls = engine.calls();

	assert_eq!(page.total_count, 123_456);
	assert_eq!(page.records[1].occurrence_id, "urn:2");
	assert_eq!(calls.len(), 2);
	assert_eq!(calls[0].index(), calls[1].index());
	assert!(calls[1].is_count());
}

#[tokio::test]
async fn search_trusts_exact_totals() {
	let engine = Arc::new(FakeEngine::new(|_| {
		Ok(search_response(1, "eq", &[json!({ "occurrence_id": "urn:1" })]))
	}));
	let service = service(engine.clone());
	let page = service
		.search::<ObservationHit>(&SearchRequest { take: 10, ..Default::default() })
		.await
		.expect("Search failed.")
		.expect("Search should stay within the window.");

	assert_eq!(page.total_count, 1);
	assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn engine_failures_surface_with_diagnostics() {
	let engine = Arc::new(FakeEngine::new(|_| {
		Err(sos_storage::Error::Engine { status: 400, debug: "parsing_exception".to_string() })
	}));
	let service = service(engine);
	let err = service.count(&taxa_filter(&[42], false)).await.expect_err("Expected an engine error.");

	match err {
		Error::Engine { debug, .. } => assert_eq!(debug, "parsing_exception"),
		other => panic!("Unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn sum_underlying_taxa_rolls_descendants_into_the_requested_taxon() {
	let observations = [(42, 5), (43, 3), (44, 2), (7, 9)];
	let engine = Arc::new(FakeEngine::new(move |call| {
		let allowed = requested_taxa(call.body());
		let buckets = observations
			.iter()
			.filter(|(taxon_id, _)| allowed.as_ref().is_none_or(|ids| ids.contains(taxon_id)))
			.map(|(taxon_id, count)| taxon_bucket(*taxon_id, *count))
			.collect::<Vec<_>>();

		Ok(serve_composite("taxa", &buckets, call.body()))
	}));
	let service = service(engine.clone());
	let page = service
		.get_taxon_aggregation(&TaxonAggregationRequest {
			filter: taxa_filter(&[42], true),
			sum_underlying_taxa: true,
			..Default::default()
		})
		.await
		.expect("Taxon aggregation failed.")
		.expect("Taxon aggregation should stay within limits.");
	let ids = page.records.iter().map(|item| item.taxon_id).collect::<Vec<_>>();

	assert_eq!(ids, vec![42, 43, 44]);
	assert_eq!(page.records[0].sum_observation_count, 10);
	assert_eq!(page.records[0].observation_count, 5);
	assert_eq!(engine.call_count(), 2);
	assert!(requested_taxa(engine.calls()[0].body()).is_none());
}

#[tokio::test]
async fn taxon_aggregation_without_summing_reports_raw_counts() {
	let engine = Arc::new(FakeEngine::new(|call| {
		let buckets = vec![taxon_bucket(43, 3), taxon_bucket(42, 5)];

		Ok(serve_composite("taxa", &buckets, call.body()))
	}));
	let service = service(engine);
	let page = service
		.get_taxon_aggregation(&TaxonAggregationRequest {
			filter: taxa_filter(&[42, 43], false),
			take: Some(1),
			..Default::default()
		})
		.await
		.expect("Taxon aggregation failed.")
		.expect("Taxon aggregation should stay within limits.");

	assert_eq!(page.total_count, 2);
	assert_eq!(page.records.len(), 1);
	assert_eq!(page.records[0].taxon_id, 42);
	assert_eq!(page.records[0].sum_observation_count, 5);
}

#[tokio::test]
async fn taxon_sum_aggregation_pages_and_propagates_provinces() {
	let buckets = [(42, "1", 2), (43, "1", 1), (43, "2", 4), (44, "3", 1), (7, "2", 1)]
		.into_iter()
		.map(|(taxon_id, province_id, doc_count)| {
			json!({ "key": { "taxon_id": taxon_id, "province_id": province_id }, "doc_count": doc_count })
		})
		.collect::<Vec<_>>();
	let engine = Arc::new(FakeEngine::new(move |call| {
		Ok(serve_composite("taxa_by_province", &buckets, call.body()))
	}));
	let service = service_with(engine.clone(), Search { composite_page_size: 2, ..Default::default() }, 0);
	let items = service
		.get_taxon_sum_aggregation(&Filter::default(), &CancellationToken::new())
		.await
		.expect("Taxon sum aggregation failed.");
	let genus = items.iter().find(|item| item.taxon_id == 42).expect("Taxon 42 should be present.");
	let biota = items.iter().find(|item| item.taxon_id == 0).expect("Biota should be present.");

	assert_eq!(engine.call_count(), 3);
	assert_eq!(genus.sum_observation_count, 8);
	assert_eq!(genus.sum_province_count, 3);
	assert_eq!(genus.province_count, 1);
	assert_eq!(biota.sum_observation_count, 9);
	assert_eq!(biota.sum_observation_count_by_province_id["2"], 5);
}

#[tokio::test]
async fn taxon_sum_aggregation_counts_observations_without_a_province() {
	let buckets = [(42, Some("1"), 2), (42, None, 3), (43, None, 1)]
		.into_iter()
		.map(|(taxon_id, province_id, doc_count)| {
			json!({ "key": { "taxon_id": taxon_id, "province_id": province_id }, "doc_count": doc_count })
		})
		.collect::<Vec<_>>();
	let engine = Arc::new(FakeEngine::new(move |call| {
		Ok(serve_composite("taxa_by_province", &buckets, call.body()))
	}));
	let service = service(engine.clone());
	let items = service
		.get_taxon_sum_aggregation(&Filter::default(), &CancellationToken::new())
		.await
		.expect("Taxon sum aggregation failed.");
	let genus = items.iter().find(|item| item.taxon_id == 42).expect("Taxon 42 should be present.");
	let biota = items.iter().find(|item| item.taxon_id == 0).expect("Biota should be present.");
	let calls = engine.calls();
	let province_source = &calls[0].body()["aggs"]["taxa_by_province"]["composite"]["sources"][1];

	assert_eq!(province_source["province_id"]["terms"]["missing_bucket"], json!(true));
	assert_eq!(genus.observation_count, 5);
	assert_eq!(genus.province_count, 1);
	assert_eq!(genus.sum_observation_count, 6);
	assert_eq!(genus.sum_province_count, 1);
	assert_eq!(biota.sum_observation_count, 6);
	assert_eq!(biota.sum_observation_count_by_province_id.len(), 1);
}

#[tokio::test]
async fn cancelled_summation_returns_no_partial_result() {
	let cancel = CancellationToken::new();
	let trigger = cancel.clone();
	let buckets = (0..10)
		.map(|id| json!({ "key": { "taxon_id": id, "province_id": "1" }, "doc_count": 1 }))
		.collect::<Vec<_>>();
	let engine = Arc::new(FakeEngine::new(move |call| {
		trigger.cancel();

		Ok(serve_composite("taxa_by_province", &buckets, call.body()))
	}));
	let service = service_with(engine.clone(), Search { composite_page_size: 3, ..Default::default() }, 0);
	let err = service
		.get_taxon_sum_aggregation(&Filter::default(), &cancel)
		.await
		.expect_err("Expected cancellation.");

	assert!(matches!(err, Error::Cancelled));
	assert_eq!(engine.call_count(), 1);
}

#[tokio::test]
async fn geo_grid_over_the_bucket_cap_is_a_limit_failure() {
	for (cells, within_cap) in [(10_000, true), (10_001, false)] {
		let engine = Arc::new(FakeEngine::new(move |_| {
			let buckets = (0..cells)
				.map(|_| json!({ "key": "u6sce", "doc_count": 1, "taxa_count": { "value": 1 } }))
				.collect::<Vec<_>>();

			Ok(composite_response("cells", &buckets, None))
		}));
		let service = service(engine.clone());
		let result = service
			.geo_grid(&taxa_filter(&[42], false), 5, &sweden())
			.await
			.expect("Geo grid failed.");
		let calls = engine.calls();
		let requested = &calls[0].body()["aggs"]["cells"]["geohash_grid"];

		assert_eq!(requested["size"], json!(10_001));

		if within_cap {
			let grid = result.expect("Grid should fit the cap.");

			assert_eq!(grid.grid_cell_count, 10_000);
			assert_eq!(grid.grid_cells[0].taxa_count, 1);
		} else {
			let limit = result.expect_err("Expected a bucket limit failure.");

			assert_eq!(limit.limit, ResourceLimit::AggregationBuckets { max: 10_000 });
			assert!(limit.message.contains("lower precision"));
		}
	}
}

#[tokio::test]
async fn geo_tile_decodes_tile_keys() {
	let engine = Arc::new(FakeEngine::new(|_| {
		let buckets = [json!({ "key": "4/8/4", "doc_count": 3, "taxa_count": { "value": 2 } })];

		Ok(composite_response("cells", &buckets, None))
	}));
	let service = service(engine);
	let result = service
		.geo_tile(&taxa_filter(&[42], false), 4, &sweden())
		.await
		.expect("Geo tile failed.")
		.expect("Tiles should fit the cap.");
	let cell = &result.grid_cell_tiles[0];

	assert_eq!(cell.tile.to_string(), "4/8/4");
	assert_eq!(cell.observations_count, 3);
	assert!((cell.bounding_box.top_left.longitude - 0.0).abs() < 1e-9);
}

#[tokio::test]
async fn geo_tile_taxa_pages_resume_from_returned_keys() {
	let buckets = [("4/8/4", 1), ("4/8/4", 2), ("4/8/5", 1), ("4/9/4", 3), ("4/9/4", 7)]
		.into_iter()
		.map(|(tile, taxon_id)| json!({ "key": { "geotile": tile, "taxon_id": taxon_id }, "doc_count": 1 }))
		.collect::<Vec<_>>();
	let engine = Arc::new(FakeEngine::new(move |call| {
		Ok(serve_composite("tile_taxa", &buckets, call.body()))
	}));
	let service = service(engine.clone());
	let first = service
		.geo_tile_taxa_page(&GeoTileTaxaRequest {
			filter: taxa_filter(&[42], false),
			zoom: 4,
			max_buckets: 3,
			..Default::default()
		})
		.await
		.expect("First page failed.");

	assert!(first.has_more_data);
	assert_eq!(first.cells.len(), 2);
	assert_eq!(first.cells[0].taxa.len(), 2);
	assert_eq!(first.next_geo_tile_key.as_deref(), Some("4/8/5"));
	assert_eq!(first.next_taxon_id_key, Some(1));

	let second = service
		.geo_tile_taxa_page(&GeoTileTaxaRequest {
			filter: taxa_filter(&[42], false),
			zoom: 4,
			max_buckets: 3,
			geo_tile_key: first.next_geo_tile_key.clone(),
			taxon_id_key: first.next_taxon_id_key,
			..Default::default()
		})
		.await
		.expect("Second page failed.");

	assert!(!second.has_more_data);
	assert_eq!(second.next_geo_tile_key, None);
	assert_eq!(second.cells.len(), 1);
	assert_eq!(second.cells[0].taxa.len(), 2);

	let complete = service
		.geo_tile_taxa_complete(&taxa_filter(&[42], false), 4, None, &CancellationToken::new())
		.await
		.expect("Complete aggregation failed.");

	assert_eq!(complete.iter().map(|cell| cell.taxa.len()).sum::<usize>(), 5);
}

#[tokio::test]
async fn taxa_exist_reports_each_requested_taxon() {
	let engine = Arc::new(FakeEngine::new(|_| {
		let buckets = [json!({ "key": 42, "doc_count": 3 })];

		Ok(composite_response("taxa", &buckets, None))
	}));
	let service = service(engine.clone());
	let indications = service
		.taxa_exist(&Filter::default(), &[42, 43])
		.await
		.expect("Exists check failed.")
		.expect("Exists check should stay within limits.");

	assert!(indications[0].exists);
	assert!(!indications[1].exists);
	assert_eq!(requested_taxa(engine.calls()[0].body()), Some(vec![42, 43]));
}

#[tokio::test]
async fn species_list_with_zero_skip_and_take_returns_everything() {
	let engine = Arc::new(FakeEngine::new(|call| {
		let buckets = [(1, 2), (2, 9), (3, 4)]
			.into_iter()
			.map(|(taxon_id, doc_count)| json!({ "key": { "taxon_id": taxon_id }, "doc_count": doc_count }))
			.collect::<Vec<_>>();

		Ok(serve_composite("species", &buckets, call.body()))
	}));
	let service = service(engine);
	let request = |skip, take| AggregationRequest {
		filter: taxa_filter(&[1, 2, 3], false),
		aggregation_type: AggregationType::SpeciesSightingsList,
		skip,
		take,
	};
	let all = service
		.aggregate(&request(0, 0))
		.await
		.expect("Aggregate failed.")
		.expect("Aggregate should stay within limits.");
	let second = service
		.aggregate(&request(1, 1))
		.await
		.expect("Aggregate failed.")
		.expect("Aggregate should stay within limits.");

	assert_eq!(
		all.records.iter().map(|item| item.aggregation_key.as_str()).collect::<Vec<_>>(),
		vec!["2", "3", "1"]
	);
	assert_eq!(all.total_count, 3);
	assert_eq!(second.records.len(), 1);
	assert_eq!(second.records[0].aggregation_key, "3");
}

#[test]
fn numeric_value_without_operator_adds_no_clause() {
	let taxa = StaticTaxonTree::new(tree());
	let base = taxa_filter(&[42], false);
	let baseline = query::compile(&base, &taxa).expect("Failed to compile filter.").include.len();
	let compiled_with = |numeric: NumericFilter| {
		let filter = base.with_base(|filter| filter.length = Some(numeric));

		query::compile(&filter, &taxa).expect("Failed to compile filter.").include.len()
	};

	assert_eq!(compiled_with(NumericFilter { value: Some(3.0), operator: None }), baseline);
	assert_eq!(
		compiled_with(NumericFilter { value: Some(3.0), operator: Some("between".to_string()) }),
		baseline
	);
	assert_eq!(
		compiled_with(NumericFilter { value: Some(3.0), operator: Some("GTE".to_string()) }),
		baseline + 1
	);
}

#[test]
fn tri_state_branches_are_mutually_exclusive() {
	let taxa = StaticTaxonTree::new(tree());
	let compile = |filter: SearchFilter| {
		query::compile(&Filter::from(filter), &taxa).expect("Failed to compile filter.").include
	};
	let baseline = compile(SearchFilter::default());
	let cases = [
		(
			SearchFilter { validation_status: StatusValidation::Validated, ..Default::default() },
			SearchFilter { validation_status: StatusValidation::NotValidated, ..Default::default() },
		),
		(
			SearchFilter {
				determination: DeterminationFilter::OnlyUnsureDetermination,
				..Default::default()
			},
			SearchFilter {
				determination: DeterminationFilter::NotUnsureDetermination,
				..Default::default()
			},
		),
		(
			SearchFilter { unspontaneous: UnspontaneousFilter::NotUnspontaneous, ..Default::default() },
			SearchFilter { unspontaneous: UnspontaneousFilter::Unspontaneous, ..Default::default() },
		),
		(
			SearchFilter { not_recovered: NotRecoveredFilter::OnlyNotRecovered, ..Default::default() },
			SearchFilter {
				not_recovered: NotRecoveredFilter::DontIncludeNotRecovered,
				..Default::default()
			},
		),
		(
			SearchFilter {
				not_present: NotPresentFilter::DontIncludeNotPresent,
				..Default::default()
			},
			SearchFilter { not_present: NotPresentFilter::OnlyNotPresent, ..Default::default() },
		),
	];

	for (only, not) in cases {
		let only = compile(only);
		let not = compile(not);
		let only_extra = only.iter().filter(|clause| !baseline.contains(clause)).collect::<Vec<_>>();
		let not_extra = not.iter().filter(|clause| !baseline.contains(clause)).collect::<Vec<_>>();

		assert_eq!(only_extra.len(), 1);
		assert_eq!(not_extra.len(), 1);
		assert_ne!(only_extra, not_extra);
		assert!(!only.contains(not_extra[0]));
	}
}
