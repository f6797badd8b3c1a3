/// Declarative macro generating `EventType`, `EventPayload`,
/// `ALL_EVENT_TYPES`, wire-format helpers, domain groups, and typed
/// payload access from a single source of truth.
///
/// # Sections
///
/// - **`events`**: Variants whose payload is a typed struct, deserialized via
///   `serde_json::from_value` and validated at the store boundary.
/// - **`domain_groups`**: Named boolean methods grouping variants.
macro_rules! define_events {
    (
        events {
            $(
                $(#[doc = $doc:literal])*
                $variant:ident => $wire:literal => $payload_ty:ty
            ),* $(,)?
        }
        domain_groups {
            $(
                $(#[doc = $gdoc:literal])*
                $method:ident => [$($gv:ident),* $(,)?]
            ),* $(,)?
        }
    ) => {
        // ── EventType enum ──────────────────────────────────────────

        /// Discriminator for every persisted event type.
        ///
        /// Each variant serializes to its snake_case wire string
        /// (e.g. `"tool_call_sql"`).
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventType {
            $(
                $(#[doc = $doc])*
                #[serde(rename = $wire)]
                $variant,
            )*
        }

        /// All event type variants in definition order.
        pub const ALL_EVENT_TYPES: [EventType; { [$($wire,)*].len() }] = [
            $(EventType::$variant,)*
        ];

        impl EventType {
            /// Canonical wire string (e.g. `"user_message"`).
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)*
                }
            }

            $(
                $(#[doc = $gdoc])*
                #[must_use]
                pub fn $method(self) -> bool {
                    matches!(self, $(Self::$gv)|*)
                }
            )*
        }

        impl std::fmt::Display for EventType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for EventType {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)*
                    _ => Err(format!("unknown event type: {s}")),
                }
            }
        }

        // ── EventPayload enum ───────────────────────────────────────

        /// Typed payload union, one variant per [`EventType`].
        #[derive(Clone, Debug, PartialEq)]
        pub enum EventPayload {
            $(
                $(#[doc = $doc])*
                $variant($payload_ty),
            )*
        }

        impl EventPayload {
            /// The discriminator matching this payload.
            #[must_use]
            pub fn event_type(&self) -> EventType {
                match self {
                    $(Self::$variant(_) => EventType::$variant,)*
                }
            }

            /// Serialize the payload body (without its discriminator).
            pub fn to_value(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
                match self {
                    $(Self::$variant(p) => serde_json::to_value(p),)*
                }
            }

            /// Deserialize a raw payload against the schema of `event_type`.
            pub fn from_parts(
                event_type: EventType,
                value: serde_json::Value,
            ) -> std::result::Result<Self, serde_json::Error> {
                match event_type {
                    $(
                        EventType::$variant => Ok(Self::$variant(serde_json::from_value(value)?)),
                    )*
                }
            }
        }
    };
}
