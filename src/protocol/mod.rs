// Protocol: PNP packet decoding (board → host) and key event → note translation.
pub mod packet;
pub mod notes;
