// Authentication: bcrypt password hashes, HS256 access/refresh JWTs carried in
// an HttpOnly cookie or a Bearer header, and role-based tool permissions.

pub mod extract;
pub mod handlers;
pub mod password;
pub mod permissions;
pub mod service;
pub mod store;
pub mod tokens;

pub const ACCESS_COOKIE: &str = "access_token";
pub const LAST_PAGE_COOKIE: &str = "last_page";
pub const API_KEY_HEADER: &str = "x-api-key";
