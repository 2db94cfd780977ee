//! Property-based tests for configuration module
//!
//! Generates window geometries and pool sizes and checks that validation
//! accepts exactly the layouts whose buffer fits in the pool.

use super::*;
use proptest::prelude::*;

prop_compose! {
    fn window_config()(
        width in 1u32..4096u32,
        height in 1u32..4096u32,
    ) -> WindowConfig {
        WindowConfig {
            title: "adjimg".to_string(),
            width,
            height,
        }
    }
}

proptest! {
    #[test]
    fn test_stride_is_four_bytes_per_pixel(window in window_config()) {
        prop_assert_eq!(window.stride(), window.width * 4);
        prop_assert_eq!(window.buffer_size(), window.width as usize * window.height as usize * 4);
    }

    #[test]
    fn test_validation_matches_pool_fit(
        window in window_config(),
        pool_capacity in 1usize..(64 * 1024 * 1024),
    ) {
        let fits = window.buffer_size() <= pool_capacity;
        let config = ClientConfig {
            window,
            shm: ShmConfig { pool_capacity },
            input: InputConfig::default(),
        };

        prop_assert_eq!(config.validate().is_ok(), fits);
    }
}
