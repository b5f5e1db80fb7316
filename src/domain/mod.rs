// Domain layer: the LCR document model and the ports the update pipeline drives.

pub mod model;
pub mod ports;
pub mod xml;
