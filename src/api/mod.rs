use rocket::Route;

mod admin;
mod dispatch;
mod results;
mod station;
mod voting;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(voting::routes());
    routes.extend(station::routes());
    routes.extend(dispatch::routes());
    routes.extend(results::routes());
    routes.extend(admin::routes());
    routes
}
