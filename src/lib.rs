pub mod log {
    pub use ard_log::*;
}

pub mod sync {
    pub mod prelude {
        pub use ard_sync::prelude::*;
    }

    pub use ard_sync::*;
}
