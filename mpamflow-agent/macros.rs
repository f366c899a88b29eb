//! Table-style declarations for metric families and MSC features

/// Declare a family of gauges
///
/// Each variant names its prometheus metric and help text. The generated
/// `ALL` table keeps declaration order, which is registration order.
///
/// ```
/// use mpamflow::metric_enum;
///
/// metric_enum! {
///     pub enum DeviceMetric {
///         Probed => ("mpam_msc_probed", "1 once the MSC has been probed"),
///         OnlineCpus => ("mpam_msc_online_cpus", "Online CPUs reaching the MSC"),
///     }
/// }
///
/// assert_eq!(DeviceMetric::Probed.name(), "mpam_msc_probed");
/// assert_eq!(DeviceMetric::ALL.len(), 2);
/// ```
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => ($metric:literal, $help:literal)),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $metric,)*
                }
            }

            pub fn help(&self) -> &'static str {
                match self {
                    $($name::$variant => $help,)*
                }
            }
        }
    };
}

/// Declare the named features of an MSC
///
/// Every variant carries the name used in logs and platform descriptions
/// (also its serde name) and its bit in the feature set type.
#[macro_export]
macro_rules! feature_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $flags:ty {
            $($variant:ident => ($str:literal, $flag:expr)),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $str)] $variant,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn flag(&self) -> $flags {
                match self {
                    $($name::$variant => $flag,)*
                }
            }

            /// Named features present in `flags`, in declaration order
            pub fn present_in(flags: $flags) -> impl Iterator<Item = $name> {
                $name::ALL
                    .iter()
                    .copied()
                    .filter(move |feature| flags.contains(feature.flag()))
            }
        }
    };
}
