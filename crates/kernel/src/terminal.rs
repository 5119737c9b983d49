/// Character output used by the `print` and `put_char` commands.
pub trait Terminal {
    fn write_str(&mut self, s: &str);

    fn write_char(&mut self, c: u8);
}
