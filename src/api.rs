use rocket::Route;

mod candidates;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(candidates::routes());
    routes.extend(voting::routes());
    routes
}
