//! Result type alias for the warehouse engine

use super::errors::WarehouseError;

/// Result type alias for warehouse operations
///
/// # Examples
///
/// ```
/// use imaging_warehouse::domain::result::Result;
/// use imaging_warehouse::domain::errors::WarehouseError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(WarehouseError::ValueRange("confidence 1.5".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, WarehouseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::WarehouseError;

    #[test]
    fn test_result_ok() {
        let result: Result<i32> = Ok(42);
        assert!(result.is_ok());
    }

    #[test]
    fn test_result_err() {
        let result: Result<i32> = Err(WarehouseError::Integrity("test error".to_string()));
        assert!(result.is_err());
    }
}
