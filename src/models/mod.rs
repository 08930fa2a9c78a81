mod record;

pub(crate) use record::{AsnRow, CityRow, CountryRow};
pub use record::{Attributes, GeoAttributes, GeoRecord, GeoRow, Kind, KindRow, Table};
