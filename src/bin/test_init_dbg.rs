fn main() {
    let dir = std::env::temp_dir().join("sdtest1");
    let r = sampledepot::db::init(dir.to_str().unwrap());
    println!("{:?}", r);
}
