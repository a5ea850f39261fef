pub mod lifecycle;

pub use lifecycle::ComposeStack;
