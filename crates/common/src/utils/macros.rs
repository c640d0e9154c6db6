//! Macros for reducing boilerplate code

/// Implements `Display` and `FromStr` for fieldless enums backed by string
/// tokens.
///
/// `Display` writes the token exactly as given. `FromStr` matches
/// case-insensitively and reports the enum name on failure.
///
/// # Example
///
/// ```rust
/// use netweave_common::impl_token_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Strategy {
///     RoundRobin,
///     LeastConnections,
/// }
///
/// impl_token_conversions!(Strategy {
///     RoundRobin => "round_robin",
///     LeastConnections => "least_connections",
/// });
///
/// assert_eq!(Strategy::RoundRobin.to_string(), "round_robin");
/// assert_eq!("LEAST_CONNECTIONS".parse::<Strategy>(), Ok(Strategy::LeastConnections));
/// ```
#[macro_export]
macro_rules! impl_token_conversions {
    ($enum_name:ident { $($variant:ident => $token:expr),+ $(,)? }) => {
        impl $enum_name {
            /// The canonical string token for this variant.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $token,)+
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
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($token) {
                        return Ok(Self::$variant);
                    }
                )+
                Err(format!("Invalid {}: {}", stringify!($enum_name), s))
            }
        }
    };
}
