//! Macro for implementing Display and FromStr for wire-string enums
//!
//! Queue rows, webhook payloads and HTTP query parameters all carry enum
//! values as lowercase strings (`"pending"`, `"contact"`, `"to_remote"`).
//! This macro keeps the string form of each enum in one place.
//!
//! # Example
//!
//! ```rust
//! use crmsync_domain::impl_wire_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Direction {
//!     ToRemote,
//!     FromRemote,
//! }
//!
//! impl_wire_conversions!(Direction {
//!     ToRemote => "to_remote",
//!     FromRemote => "from_remote",
//! });
//!
//! assert_eq!(Direction::ToRemote.to_string(), "to_remote");
//! assert_eq!("FROM_REMOTE".parse::<Direction>(), Ok(Direction::FromRemote));
//! ```

/// Implements `Display`, `FromStr` and `as_str` for a fieldless enum.
///
/// Parsing is case-insensitive; output is always the canonical lowercase
/// string. Parse errors name the enum and echo the rejected input.
#[macro_export]
macro_rules! impl_wire_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical wire representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
