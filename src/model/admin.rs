use rocket::{
    http::Status,
    request::{FromRequest, Outcome},
    Request,
};

use crate::config::Config;

/// Header carrying the administrator key.
pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

/// Proof that the request presented the configured admin key.
#[derive(Debug)]
pub struct AdminKey(());

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.rocket().state::<Config>() {
            Some(config) => config,
            None => {
                error!("Admin key requested but no config is managed");
                return Outcome::Failure((Status::InternalServerError, ()));
            }
        };
        match req.headers().get_one(ADMIN_KEY_HEADER) {
            Some(key) if key == config.admin_key() => Outcome::Success(AdminKey(())),
            Some(_) => {
                warn!("Rejected request with a wrong admin key");
                Outcome::Failure((Status::Unauthorized, ()))
            }
            None => Outcome::Failure((Status::Unauthorized, ())),
        }
    }
}
