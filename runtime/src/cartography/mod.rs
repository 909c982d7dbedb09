//! Document understanding: robots.txt directives and sitemap parsing.

pub mod robots;
pub mod sitemap;
