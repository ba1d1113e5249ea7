//! Guest domain definition and launch.

mod launcher;
mod xml;

pub use launcher::DomainLauncher;
pub use xml::DomainXmlBuilder;
