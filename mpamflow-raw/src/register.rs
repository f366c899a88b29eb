//! Generic register abstractions for type-safe MMIO programming

/// Trait for register layouts that can be converted to/from raw register values
///
/// MSC registers are accessed as 32-bit words. This trait provides type-safe
/// conversion between structured register layouts and those raw values.
///
/// # Example
///
/// ```ignore
/// use mpamflow_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_reg_value(&self) -> u32 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u32) << 8)
///     }
///
///     fn from_reg_value(value: u32) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw register value
    fn to_reg_value(&self) -> u32;

    /// Parse a raw register value into this register layout
    fn from_reg_value(value: u32) -> Self;

    /// Validate that the register values are within acceptable ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// A hardware register with window offset and typed layout
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    /// Byte offset inside the MSC window
    pub offset: u16,
    /// Typed register layout
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    /// Create a new register with the given offset and layout
    pub fn new(offset: u16, layout: T) -> Self {
        Self { offset, layout }
    }

    /// Create a register with default layout
    pub fn with_offset(offset: u16) -> Self
    where
        T: Default,
    {
        Self {
            offset,
            layout: T::default(),
        }
    }

    /// Validate the register layout
    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    /// Get the raw value for this register
    pub fn to_reg_value(&self) -> u32 {
        self.layout.to_reg_value()
    }

    /// Update the layout from a raw value
    pub fn from_reg_value(&mut self, value: u32) {
        self.layout = T::from_reg_value(value);
    }
}

/// Contiguous bitmask with bits `low..=high` set, like the kernel's `GENMASK`.
///
/// Returns 0 when `high < low`, which lets callers express "no bits" for
/// zero-width fields without special casing.
pub const fn genmask(high: u32, low: u32) -> u32 {
    if high < low || low > 31 {
        return 0;
    }
    let high = if high > 31 { 31 } else { high };
    let upper = if high == 31 {
        u32::MAX
    } else {
        (1u32 << (high + 1)) - 1
    };
    upper & !((1u32 << low) - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genmask() {
        assert_eq!(genmask(15, 0), 0xFFFF);
        assert_eq!(genmask(15, 8), 0xFF00);
        assert_eq!(genmask(31, 0), u32::MAX);
        assert_eq!(genmask(3, 4), 0);
        assert_eq!(genmask(0, 0), 1);
    }
}
