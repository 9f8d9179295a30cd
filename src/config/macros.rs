//! Configuration macros for zero-repetition config definitions
//!
//! `config_struct!` defines a configuration struct with embedded defaults in a
//! single declaration and generates:
//! - The struct with public fields
//! - A `Default` implementation with the specified values
//! - Serde support with `#[serde(default)]`, so partial TOML files work
//!
//! # Example
//! ```
//! brokerwatch::config_struct! {
//!     pub struct ProbeConfig {
//!         interval_secs: u64 = 10,
//!         enabled: bool = true,
//!     }
//! }
//! ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}
