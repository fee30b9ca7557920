use rocket::launch;

#[launch]
fn rocket() -> _ {
    let rocket = bookshelf_api::rocket();
    log::info!("starting Bookshelf API server");
    rocket
}
