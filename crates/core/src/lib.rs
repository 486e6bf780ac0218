//! Tenuto core: bus graph, filter catalog and voice routing

pub mod domain;
