use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{geo::LatLonBoundingBox, taxon_tree::BIOTA_TAXON_ID};

/// Provenance group codes of Artportalen sightings. Observations from other providers do not
/// carry the field at all.
pub mod sighting_type_group {
	pub const ORDINARY: i32 = 1;
	pub const ASSESSMENT: i32 = 2;
	pub const AGGREGATED: i32 = 4;
	pub const AGGREGATED_CHILD: i32 = 8;
	pub const REPLACEMENT: i32 = 16;
	pub const REPLACEMENT_CHILD: i32 = 32;
	pub const OWN_BREEDING_ASSESSMENT: i32 = 64;
	pub const OWN_BREEDING_ASSESSMENT_CHILD: i32 = 128;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriState {
	OnlyTrue,
	OnlyFalse,
	Any,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusValidation {
	#[default]
	BothValidatedAndNotValidated,
	Validated,
	NotValidated,
}
impl StatusValidation {
	pub fn tri_state(self) -> TriState {
		match self {
			Self::Validated => TriState::OnlyTrue,
			Self::NotValidated => TriState::OnlyFalse,
			Self::BothValidatedAndNotValidated => TriState::Any,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeterminationFilter {
	#[default]
	NoFilter,
	NotUnsureDetermination,
	OnlyUnsureDetermination,
}
impl DeterminationFilter {
	pub fn tri_state(self) -> TriState {
		match self {
			Self::OnlyUnsureDetermination => TriState::OnlyTrue,
			Self::NotUnsureDetermination => TriState::OnlyFalse,
			Self::NoFilter => TriState::Any,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnspontaneousFilter {
	#[default]
	NoFilter,
	NotUnspontaneous,
	Unspontaneous,
}
impl UnspontaneousFilter {
	// The document stores the inverse flag, `isNaturalOccurrence`.
	pub fn tri_state(self) -> TriState {
		match self {
			Self::NotUnspontaneous => TriState::OnlyTrue,
			Self::Unspontaneous => TriState::OnlyFalse,
			Self::NoFilter => TriState::Any,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotRecoveredFilter {
	#[default]
	NoFilter,
	OnlyNotRecovered,
	DontIncludeNotRecovered,
}
impl NotRecoveredFilter {
	pub fn tri_state(self) -> TriState {
		match self {
			Self::OnlyNotRecovered => TriState::OnlyTrue,
			Self::DontIncludeNotRecovered => TriState::OnlyFalse,
			Self::NoFilter => TriState::Any,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotPresentFilter {
	#[default]
	IncludeNotPresent,
	OnlyNotPresent,
	DontIncludeNotPresent,
}
impl NotPresentFilter {
	// The document stores the inverse flag, `isPositiveObservation`.
	pub fn tri_state(self) -> TriState {
		match self {
			Self::DontIncludeNotPresent => TriState::OnlyTrue,
			Self::OnlyNotPresent => TriState::OnlyFalse,
			Self::IncludeNotPresent => TriState::Any,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SightingTypeFilter {
	ShowBoth,
	ShowOnlyMerged,
	DoNotShowSightingsInMerged,
}

pub fn sighting_type_groups(filter: Option<SightingTypeFilter>) -> &'static [i32] {
	use sighting_type_group::*;

	match filter {
		None => &[
			ORDINARY,
			ASSESSMENT,
			AGGREGATED_CHILD,
			REPLACEMENT,
			REPLACEMENT_CHILD,
			OWN_BREEDING_ASSESSMENT,
			OWN_BREEDING_ASSESSMENT_CHILD,
		],
		Some(SightingTypeFilter::ShowBoth) => &[
			ORDINARY,
			ASSESSMENT,
			AGGREGATED,
			AGGREGATED_CHILD,
			REPLACEMENT,
			REPLACEMENT_CHILD,
			OWN_BREEDING_ASSESSMENT,
			OWN_BREEDING_ASSESSMENT_CHILD,
		],
		Some(SightingTypeFilter::ShowOnlyMerged) => &[AGGREGATED],
		Some(SightingTypeFilter::DoNotShowSightingsInMerged) => &[
			ORDINARY,
			ASSESSMENT,
			AGGREGATED,
			REPLACEMENT,
			REPLACEMENT_CHILD,
			OWN_BREEDING_ASSESSMENT,
			OWN_BREEDING_ASSESSMENT_CHILD,
		],
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeOperator {
	Eq,
	Gte,
	Lte,
}
impl RangeOperator {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"eq" => Some(Self::Eq),
			"gte" => Some(Self::Gte),
			"lte" => Some(Self::Lte),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericFilter {
	pub value: Option<f64>,
	pub operator: Option<String>,
}
impl NumericFilter {
	/// Both a value and a recognized operator are required; anything else is ignored.
	pub fn applicable(&self) -> Option<(RangeOperator, f64)> {
		let value = self.value?;
		let operator = RangeOperator::parse(self.operator.as_deref()?)?;

		Some((operator, value))
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonFilter {
	pub ids: Vec<i32>,
	pub include_underlying_taxa: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFilterType {
	#[default]
	OverlappingStartDateAndEndDate,
	BetweenStartDateAndEndDate,
	OnlyStartDate,
	OnlyEndDate,
	ReportedDate,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateFilter {
	#[serde(with = "time::serde::rfc3339::option")]
	pub start_date: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub end_date: Option<OffsetDateTime>,
	pub filter_type: DateFilterType,
	/// Match the same day/month period in every year between the start and end years.
	pub period_for_all_years: bool,
}
impl DateFilter {
	pub fn is_active(&self) -> bool {
		self.start_date.is_some() || self.end_date.is_some()
	}
}

/// GeoJSON-like shapes. Coordinates are `[lon, lat]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoShape {
	Point { coordinates: [f64; 2] },
	Polygon { coordinates: Vec<Vec<[f64; 2]>> },
	Envelope { coordinates: [[f64; 2]; 2] },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeographicsFilter {
	pub geometries: Vec<GeoShape>,
	/// Radius in metres used for point geometries.
	pub max_distance_from_point: Option<f64>,
	pub consider_observation_accuracy: bool,
	pub max_accuracy: Option<i32>,
}
impl GeographicsFilter {
	pub fn is_active(&self) -> bool {
		!self.geometries.is_empty() || self.max_accuracy.is_some()
	}
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
	pub taxa: Option<TaxonFilter>,
	pub date: Option<DateFilter>,
	pub location: Option<GeographicsFilter>,
	pub output_fields: Vec<String>,
	pub data_provider_ids: Vec<i32>,
	pub project_ids: Vec<i32>,
	pub length: Option<NumericFilter>,
	pub weight: Option<NumericFilter>,
	pub quantity: Option<NumericFilter>,
	pub validation_status: StatusValidation,
	pub determination: DeterminationFilter,
	pub unspontaneous: UnspontaneousFilter,
	pub not_recovered: NotRecoveredFilter,
	pub not_present: NotPresentFilter,
	pub sighting_type: Option<SightingTypeFilter>,
}
impl SearchFilter {
	pub fn is_active(&self) -> bool {
		let numeric_active = [&self.length, &self.weight, &self.quantity]
			.into_iter()
			.any(|filter| filter.as_ref().and_then(NumericFilter::applicable).is_some());

		self.taxa.as_ref().is_some_and(|taxa| !taxa.ids.is_empty())
			|| self.date.as_ref().is_some_and(DateFilter::is_active)
			|| self.location.as_ref().is_some_and(GeographicsFilter::is_active)
			|| !self.data_provider_ids.is_empty()
			|| !self.project_ids.is_empty()
			|| numeric_active
			|| self.validation_status.tri_state() != TriState::Any
			|| self.determination.tri_state() != TriState::Any
			|| self.unspontaneous.tri_state() != TriState::Any
			|| self.not_recovered.tri_state() != TriState::Any
			|| self.not_present.tri_state() != TriState::Any
			|| self.sighting_type.is_some()
	}
}

/// Operator-only filter. The public shape never carries these fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilterInternal {
	#[serde(flatten)]
	pub base: SearchFilter,
	pub reported_by_user_id: Option<i32>,
	pub observed_by_user_id: Option<i32>,
	pub bounding_box: Option<LatLonBoundingBox>,
	pub only_with_media: bool,
	pub only_with_notes: bool,
	pub has_triggered_validation_rule: bool,
	pub has_triggered_validation_rule_with_warning: bool,
	pub only_second_hand_information: bool,
	pub excluded_verification_status_ids: Vec<i32>,
	pub include_protected: bool,
	pub include_real_count: bool,
}
impl SearchFilterInternal {
	pub fn is_active(&self) -> bool {
		self.base.is_active()
			|| self.reported_by_user_id.is_some()
			|| self.observed_by_user_id.is_some()
			|| self.bounding_box.is_some()
			|| self.only_with_media
			|| self.only_with_notes
			|| self.has_triggered_validation_rule
			|| self.has_triggered_validation_rule_with_warning
			|| self.only_second_hand_information
			|| !self.excluded_verification_status_ids.is_empty()
	}
}

/// A per-request filter value. Derived filters are built with the `with_*` copies, never by
/// mutating a shared instance.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
	Public(SearchFilter),
	Internal(SearchFilterInternal),
}
impl Filter {
	pub fn base(&self) -> &SearchFilter {
		match self {
			Self::Public(filter) => filter,
			Self::Internal(filter) => &filter.base,
		}
	}

	pub fn internal(&self) -> Option<&SearchFilterInternal> {
		match self {
			Self::Public(_) => None,
			Self::Internal(filter) => Some(filter),
		}
	}

	pub fn is_active(&self) -> bool {
		match self {
			Self::Public(filter) => filter.is_active(),
			Self::Internal(filter) => filter.is_active(),
		}
	}

	pub fn include_protected(&self) -> bool {
		self.internal().is_some_and(|filter| filter.include_protected)
	}

	pub fn requests_real_count(&self) -> bool {
		self.internal().is_some_and(|filter| filter.include_real_count)
	}

	pub fn taxon_ids(&self) -> &[i32] {
		self.base().taxa.as_ref().map(|taxa| taxa.ids.as_slice()).unwrap_or(&[])
	}

	pub fn include_underlying_taxa(&self) -> bool {
		self.base().taxa.as_ref().is_some_and(|taxa| taxa.include_underlying_taxa)
	}

	/// Ids to keep when summing a filtered taxon set: the explicit ids, or Biota when the filter
	/// asks for everything underneath without naming a taxon.
	pub fn output_taxon_keys(&self) -> Option<Vec<i32>> {
		let taxa = self.base().taxa.as_ref()?;

		if taxa.ids.is_empty() {
			return taxa.include_underlying_taxa.then(|| vec![BIOTA_TAXON_ID]);
		}

		Some(taxa.ids.clone())
	}

	pub fn with_base(&self, f: impl FnOnce(&mut SearchFilter)) -> Self {
		let mut derived = self.clone();

		match &mut derived {
			Self::Public(filter) => f(filter),
			Self::Internal(filter) => f(&mut filter.base),
		}

		derived
	}

	pub fn without_taxa(&self) -> Self {
		self.with_base(|base| base.taxa = None)
	}

	pub fn with_taxon_ids(&self, ids: Vec<i32>, include_underlying_taxa: bool) -> Self {
		self.with_base(|base| base.taxa = Some(TaxonFilter { ids, include_underlying_taxa }))
	}
}
impl Default for Filter {
	fn default() -> Self {
		Self::Public(SearchFilter::default())
	}
}
impl From<SearchFilter> for Filter {
	fn from(filter: SearchFilter) -> Self {
		Self::Public(filter)
	}
}
impl From<SearchFilterInternal> for Filter {
	fn from(filter: SearchFilterInternal) -> Self {
		Self::Internal(filter)
	}
}

#[cfg(test)]
mod tests {
	use crate::filter::{
		DeterminationFilter, Filter, NumericFilter, RangeOperator, SearchFilter,
		SearchFilterInternal, TaxonFilter, TriState,
	};

	#[test]
	fn operator_parsing_is_case_insensitive() {
		assert_eq!(RangeOperator::parse("GTE"), Some(RangeOperator::Gte));
		assert_eq!(RangeOperator::parse(" eq "), Some(RangeOperator::Eq));
		assert_eq!(RangeOperator::parse("gt"), None);
		assert_eq!(RangeOperator::parse(""), None);
	}

	#[test]
	fn numeric_filter_requires_value_and_operator() {
		let value_only = NumericFilter { value: Some(3.0), operator: None };
		let unknown = NumericFilter { value: Some(3.0), operator: Some("between".to_string()) };
		let operator_only = NumericFilter { value: None, operator: Some("lte".to_string()) };
		let complete = NumericFilter { value: Some(3.0), operator: Some("Lte".to_string()) };

		assert!(value_only.applicable().is_none());
		assert!(unknown.applicable().is_none());
		assert!(operator_only.applicable().is_none());
		assert_eq!(complete.applicable(), Some((RangeOperator::Lte, 3.0)));
	}

	#[test]
	fn empty_filters_are_inactive() {
		assert!(!Filter::default().is_active());
		assert!(!Filter::from(SearchFilterInternal::default()).is_active());

		let value_only = SearchFilter {
			length: Some(NumericFilter { value: Some(1.0), operator: None }),
			..Default::default()
		};

		assert!(!value_only.is_active());
	}

	#[test]
	fn internal_fields_activate_only_internal_filters() {
		let internal = SearchFilterInternal { only_with_media: true, ..Default::default() };

		assert!(Filter::from(internal).is_active());
	}

	#[test]
	fn derived_filters_leave_the_source_untouched() {
		let source = Filter::from(SearchFilter {
			taxa: Some(TaxonFilter { ids: vec![42], include_underlying_taxa: true }),
			determination: DeterminationFilter::OnlyUnsureDetermination,
			..Default::default()
		});
		let stripped = source.without_taxa();

		assert_eq!(source.taxon_ids(), &[42]);
		assert!(stripped.taxon_ids().is_empty());
		assert_eq!(stripped.base().determination.tri_state(), TriState::OnlyTrue);
	}

	#[test]
	fn output_keys_fall_back_to_biota_for_all_underlying() {
		let all = Filter::from(SearchFilter {
			taxa: Some(TaxonFilter { ids: Vec::new(), include_underlying_taxa: true }),
			..Default::default()
		});
		let none = Filter::default();

		assert_eq!(all.output_taxon_keys(), Some(vec![0]));
		assert_eq!(none.output_taxon_keys(), None);
	}

	#[test]
	fn internal_filter_deserializes_flattened_base() {
		let raw = serde_json::json!({
			"taxa": { "ids": [1, 2] },
			"only_with_notes": true,
			"validation_status": "validated"
		});
		let filter: SearchFilterInternal =
			serde_json::from_value(raw).expect("Failed to parse internal filter.");

		assert_eq!(filter.base.taxa.map(|taxa| taxa.ids), Some(vec![1, 2]));
		assert!(filter.only_with_notes);
		assert_eq!(filter.base.validation_status.tri_state(), TriState::OnlyTrue);
	}
}
