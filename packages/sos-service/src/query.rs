//! Filter to search-engine query compilation.
//!
//! A filter compiles into two clause lists: `include` (all must match) and `exclude` (none may
//! match). Fields left at their default never add a clause.

use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use sos_domain::{
	filter::{
		DateFilter, DateFilterType, Filter, GeoShape, GeographicsFilter, NumericFilter,
		RangeOperator, SearchFilter, SearchFilterInternal, SightingTypeFilter, TriState,
		sighting_type_groups,
	},
	geo::LatLonBoundingBox,
};

use crate::{Error, Result, TaxonTreeProvider};

pub mod field {
	pub const TAXON_ID: &str = "taxon.id";
	pub const EVENT_START_DATE: &str = "event.startDate";
	pub const EVENT_END_DATE: &str = "event.endDate";
	pub const REPORTED_DATE: &str = "occurrence.reportedDate";
	pub const POINT_LOCATION: &str = "location.pointLocation";
	pub const POINT: &str = "location.point";
	pub const POINT_WITH_BUFFER: &str = "location.pointWithBuffer";
	pub const COORDINATE_UNCERTAINTY: &str = "location.coordinateUncertaintyInMeters";
	pub const PROVINCE_ID: &str = "location.province.featureId";
	pub const DATA_PROVIDER_ID: &str = "dataProviderId";
	pub const PROJECT_ID: &str = "projects.id";
	pub const LENGTH: &str = "occurrence.length";
	pub const WEIGHT: &str = "occurrence.weight";
	pub const QUANTITY: &str = "occurrence.organismQuantityInt";
	pub const VERIFICATION_STATUS_ID: &str = "identification.verificationStatus.id";
	pub const VALIDATED: &str = "identification.validated";
	pub const UNCERTAIN_IDENTIFICATION: &str = "identification.uncertainIdentification";
	pub const NATURAL_OCCURRENCE: &str = "occurrence.isNaturalOccurrence";
	pub const NOT_REDISCOVERED: &str = "occurrence.isNotRediscoveredObservation";
	pub const POSITIVE_OBSERVATION: &str = "occurrence.isPositiveObservation";
	pub const SIGHTING_TYPE_GROUP: &str = "artportalenInternal.sightingTypeSearchGroupId";
	pub const REPORTED_BY_USER_ID: &str = "artportalenInternal.reportedByUserId";
	pub const RECORDED_BY_USER_ID: &str = "artportalenInternal.occurrenceRecordedByInternal.userId";
	pub const MEDIA: &str = "occurrence.media";
	pub const REMARKS: &str = "occurrence.occurrenceRemarks";
	pub const TRIGGERED_RULES: &str = "artportalenInternal.hasTriggeredValidationRules";
	pub const TRIGGERED_RULES_WITH_WARNING: &str =
		"artportalenInternal.hasAnyTriggeredValidationRuleWithWarning";
	pub const OCCURRENCE_ID: &str = "occurrence.occurrenceId";
}

// Day/month comparison on the event start date, ignoring the year. `wraps` marks periods that
// run over the year end, including same-month periods ending before they start.
const PERIOD_FOR_ALL_YEARS_SCRIPT: &str = "\
if (doc['event.startDate'].size() == 0) { return false; }
def date = doc['event.startDate'].value;
int month = date.getMonthValue();
int day = date.getDayOfMonth();
boolean inStartMonth = month == params.startMonth && day >= params.startDay;
boolean inEndMonth = month == params.endMonth && day <= params.endDay;
if (!params.wraps) {
	if (params.startMonth == params.endMonth) { return inStartMonth && inEndMonth; }
	return inStartMonth || inEndMonth || (month > params.startMonth && month < params.endMonth);
}
return inStartMonth || inEndMonth || month > params.startMonth || month < params.endMonth;";

// Reported by someone other than the recorded observer. Compares two fields of the same
// document, so it is an approximation for records with shared or missing user ids.
const SECOND_HAND_INFORMATION_SCRIPT: &str = "\
doc['artportalenInternal.reportedByUserId'].size() > 0
	&& doc['artportalenInternal.occurrenceRecordedByInternal.userId'].size() > 0
	&& doc['artportalenInternal.reportedByUserId'].value
		!= doc['artportalenInternal.occurrenceRecordedByInternal.userId'].value";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledQuery {
	pub include: Vec<Value>,
	pub exclude: Vec<Value>,
}
impl CompiledQuery {
	pub fn to_query(&self) -> Value {
		json!({ "bool": { "filter": self.include, "must_not": self.exclude } })
	}

	/// Copy restricted to observations whose point location falls inside `bbox`.
	pub fn within(&self, bbox: &LatLonBoundingBox) -> Self {
		let mut derived = self.clone();

		derived.include.push(bounding_box_clause(bbox));

		derived
	}
}

pub fn compile(filter: &Filter, taxa: &dyn TaxonTreeProvider) -> Result<CompiledQuery> {
	let mut query = CompiledQuery::default();

	add_base_clauses(&mut query, filter.base(), taxa)?;

	if let Some(internal) = filter.internal() {
		add_internal_clauses(&mut query, internal);
	}

	Ok(query)
}

fn add_base_clauses(
	query: &mut CompiledQuery,
	filter: &SearchFilter,
	taxa: &dyn TaxonTreeProvider,
) -> Result<()> {
	if let Some(taxon_filter) = &filter.taxa
		&& !taxon_filter.ids.is_empty()
	{
		let ids = if taxon_filter.include_underlying_taxa {
			taxa.underlying_taxon_ids(&taxon_filter.ids, true).into_iter().collect()
		} else {
			taxon_filter.ids.clone()
		};

		query.include.push(terms(field::TAXON_ID, &ids));
	}
	if let Some(date) = &filter.date {
		add_date_clauses(query, date)?;
	}
	if let Some(location) = &filter.location {
		add_geographics_clauses(query, location);
	}
	if !filter.data_provider_ids.is_empty() {
		query.include.push(terms(field::DATA_PROVIDER_ID, &filter.data_provider_ids));
	}
	if !filter.project_ids.is_empty() {
		query.include.push(terms(field::PROJECT_ID, &filter.project_ids));
	}

	for (name, numeric) in [
		(field::LENGTH, &filter.length),
		(field::WEIGHT, &filter.weight),
		(field::QUANTITY, &filter.quantity),
	] {
		if let Some(clause) = numeric.as_ref().and_then(|numeric| numeric_clause(name, numeric)) {
			query.include.push(clause);
		}
	}

	for (name, state) in [
		(field::VALIDATED, filter.validation_status.tri_state()),
		(field::UNCERTAIN_IDENTIFICATION, filter.determination.tri_state()),
		(field::NATURAL_OCCURRENCE, filter.unspontaneous.tri_state()),
		(field::NOT_REDISCOVERED, filter.not_recovered.tri_state()),
		(field::POSITIVE_OBSERVATION, filter.not_present.tri_state()),
	] {
		if let Some(clause) = tri_state_clause(name, state) {
			query.include.push(clause);
		}
	}

	query.include.push(sighting_type_clause(filter.sighting_type));

	Ok(())
}

fn add_internal_clauses(query: &mut CompiledQuery, filter: &SearchFilterInternal) {
	if let Some(user_id) = filter.reported_by_user_id {
		query.include.push(term(field::REPORTED_BY_USER_ID, user_id));
	}
	if let Some(user_id) = filter.observed_by_user_id {
		query.include.push(term(field::RECORDED_BY_USER_ID, user_id));
	}
	if let Some(bbox) = &filter.bounding_box {
		query.include.push(bounding_box_clause(bbox));
	}
	if filter.only_with_media {
		query.include.push(exists(field::MEDIA));
	}
	if filter.only_with_notes {
		query.include.push(exists(field::REMARKS));
	}
	if filter.has_triggered_validation_rule {
		query.include.push(term(field::TRIGGERED_RULES, true));
	}
	if filter.has_triggered_validation_rule_with_warning {
		query.include.push(term(field::TRIGGERED_RULES_WITH_WARNING, true));
	}
	if filter.only_second_hand_information {
		query.include.push(json!({ "script": { "script": { "source": SECOND_HAND_INFORMATION_SCRIPT } } }));
	}
	if !filter.excluded_verification_status_ids.is_empty() {
		query
			.exclude
			.push(terms(field::VERIFICATION_STATUS_ID, &filter.excluded_verification_status_ids));
	}
}

fn add_date_clauses(query: &mut CompiledQuery, date: &DateFilter) -> Result<()> {
	let start = date.start_date.map(format_date).transpose()?;
	let end = date.end_date.map(format_date).transpose()?;

	if let (true, Some(start_date), Some(end_date)) =
		(date.period_for_all_years, date.start_date, date.end_date)
	{
		query.include.push(range(
			field::EVENT_START_DATE,
			Some(format!("{}-01-01T00:00:00Z", start_date.year())),
			Some(format!("{}-12-31T23:59:59Z", end_date.year())),
		));
		let start_day = (u8::from(start_date.month()), start_date.day());
		let end_day = (u8::from(end_date.month()), end_date.day());

		query.include.push(json!({
			"script": {
				"script": {
					"source": PERIOD_FOR_ALL_YEARS_SCRIPT,
					"params": {
						"startMonth": start_day.0,
						"startDay": start_day.1,
						"endMonth": end_day.0,
						"endDay": end_day.1,
						"wraps": start_day > end_day,
					},
				},
			},
		}));

		return Ok(());
	}

	match date.filter_type {
		DateFilterType::OverlappingStartDateAndEndDate => {
			if let Some(end) = end {
				query.include.push(range(field::EVENT_START_DATE, None, Some(end)));
			}
			if let Some(start) = start {
				query.include.push(range(field::EVENT_END_DATE, Some(start), None));
			}
		},
		DateFilterType::BetweenStartDateAndEndDate => {
			if let Some(start) = start {
				query.include.push(range(field::EVENT_START_DATE, Some(start), None));
			}
			if let Some(end) = end {
				query.include.push(range(field::EVENT_END_DATE, None, Some(end)));
			}
		},
		DateFilterType::OnlyStartDate => {
			if start.is_some() || end.is_some() {
				query.include.push(range(field::EVENT_START_DATE, start, end));
			}
		},
		DateFilterType::OnlyEndDate => {
			if start.is_some() || end.is_some() {
				query.include.push(range(field::EVENT_END_DATE, start, end));
			}
		},
		DateFilterType::ReportedDate => {
			if start.is_some() || end.is_some() {
				query.include.push(range(field::REPORTED_DATE, start, end));
			}
		},
	}

	Ok(())
}

fn add_geographics_clauses(query: &mut CompiledQuery, location: &GeographicsFilter) {
	let shape_field =
		if location.consider_observation_accuracy { field::POINT_WITH_BUFFER } else { field::POINT };
	let mut shapes = Vec::with_capacity(location.geometries.len());

	for geometry in &location.geometries {
		match geometry {
			GeoShape::Point { coordinates } => {
				let Some(distance) = location.max_distance_from_point.filter(|d| *d > 0.0) else {
					continue;
				};

				if location.consider_observation_accuracy {
					shapes.push(geo_shape(
						shape_field,
						json!({ "type": "circle", "coordinates": coordinates, "radius": format!("{distance}m") }),
					));
				} else {
					shapes.push(json!({
						"geo_distance": {
							"distance": format!("{distance}m"),
							(field::POINT_LOCATION): coordinates,
						},
					}));
				}
			},
			GeoShape::Polygon { coordinates } => {
				let mut rings = coordinates.iter();
				let Some(outer) = rings.next() else {
					continue;
				};

				shapes.push(geo_shape(shape_field, json!({ "type": "polygon", "coordinates": [outer] })));

				for hole in rings {
					query.exclude.push(geo_shape(
						shape_field,
						json!({ "type": "polygon", "coordinates": [hole] }),
					));
				}
			},
			GeoShape::Envelope { coordinates } => {
				shapes.push(geo_shape(
					shape_field,
					json!({ "type": "envelope", "coordinates": coordinates }),
				));
			},
		}
	}

	match shapes.len() {
		0 => {},
		1 => query.include.extend(shapes),
		_ => query.include.push(json!({ "bool": { "should": shapes, "minimum_should_match": 1 } })),
	}

	if let Some(max_accuracy) = location.max_accuracy {
		query.include.push(range(field::COORDINATE_UNCERTAINTY, None, Some(max_accuracy)));
	}
}

fn numeric_clause(name: &str, numeric: &NumericFilter) -> Option<Value> {
	let (operator, value) = numeric.applicable()?;

	Some(match operator {
		RangeOperator::Eq => term(name, value),
		RangeOperator::Gte => range(name, Some(value), None),
		RangeOperator::Lte => range(name, None, Some(value)),
	})
}

fn tri_state_clause(name: &str, state: TriState) -> Option<Value> {
	match state {
		TriState::OnlyTrue => Some(term(name, true)),
		TriState::OnlyFalse => Some(term(name, false)),
		TriState::Any => None,
	}
}

fn sighting_type_clause(filter: Option<SightingTypeFilter>) -> Value {
	let groups = terms(field::SIGHTING_TYPE_GROUP, sighting_type_groups(filter));

	if filter == Some(SightingTypeFilter::ShowOnlyMerged) {
		return groups;
	}

	json!({
		"bool": {
			"should": [
				groups,
				{ "bool": { "must_not": [exists(field::SIGHTING_TYPE_GROUP)] } },
			],
			"minimum_should_match": 1,
		},
	})
}

fn bounding_box_clause(bbox: &LatLonBoundingBox) -> Value {
	json!({
		"geo_bounding_box": {
			(field::POINT_LOCATION): {
				"top_left": { "lat": bbox.top_left.latitude, "lon": bbox.top_left.longitude },
				"bottom_right": {
					"lat": bbox.bottom_right.latitude,
					"lon": bbox.bottom_right.longitude,
				},
			},
		},
	})
}

fn format_date(date: OffsetDateTime) -> Result<String> {
	date.format(&Rfc3339).map_err(|err| Error::InvalidRequest {
		message: format!("Date filter value cannot be formatted: {err}."),
	})
}

fn term(name: &str, value: impl Into<Value>) -> Value {
	json!({ "term": { name: value.into() } })
}

fn terms(name: &str, values: &[i32]) -> Value {
	json!({ "terms": { name: values } })
}

fn exists(name: &str) -> Value {
	json!({ "exists": { "field": name } })
}

fn range<T>(name: &str, gte: Option<T>, lte: Option<T>) -> Value
where
	T: Into<Value>,
{
	let mut bounds = serde_json::Map::new();

	if let Some(gte) = gte {
		bounds.insert("gte".to_string(), gte.into());
	}
	if let Some(lte) = lte {
		bounds.insert("lte".to_string(), lte.into());
	}

	json!({ "range": { name: bounds } })
}

fn geo_shape(name: &str, shape: Value) -> Value {
	json!({ "geo_shape": { name: { "shape": shape, "relation": "intersects" } } })
}
