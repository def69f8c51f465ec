//! Datalink Core -- records, record sets, models, filters, and errors.
//!
//! This crate provides the data-model layer for the Datalink connection
//! engine:
//!
//! - **Value** ([`value`]): scalar field values and declared-type coercion
//! - **Record** ([`record`]): the field-map container with `id_`/`t`
//!   identity semantics
//! - **`RecordSet`** ([`record_set`]): ordered, id-unique record collections
//! - **Model** ([`model`]): declarative schemas, validation, and the
//!   relational table derivation
//! - **Filter** ([`filter`]): the per-field condition grammar consumed by
//!   query-capable backends
//! - **Error** ([`error`]): the failure taxonomy and the annotated
//!   `ErrorReport` delivered to `on_error` callbacks
//! - **Time** ([`time`]): millisecond timestamps and flexible date parsing

pub mod error;
pub mod filter;
pub mod model;
pub mod record;
pub mod record_set;
pub mod time;
pub mod value;

// Errors
pub use error::{Error, ErrorReport};

// Filter grammar
pub use filter::{Comparator, Condition, Filter};

// Models
pub use model::{ColumnSpec, FieldDef, Model, TableSpec};

// Records
pub use record::{generate_id, Record, DELETED_FIELD, ID_FIELD, TIMESTAMP_FIELD};
pub use record_set::RecordSet;

// Time helpers
pub use time::{
    now_millis, parse_date_to_timestamp, timestamp_from_number, timestamp_to_string,
    DEFAULT_DATE_FORMAT,
};

// Values
pub use value::{Value, ValueType};
