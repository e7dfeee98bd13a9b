fn main() {
    devlapse_lib::run()
}
