// Handler tiers:
// Public (no auth) -> Protected (JWT bearer carrying user id + session id)

pub mod protected;
pub mod public;
