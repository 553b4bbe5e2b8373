//! Typed ID definitions.

use crate::define_id;

define_id!(ServerId, "srv");
