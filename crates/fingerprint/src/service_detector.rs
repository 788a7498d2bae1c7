//! Well-known service names by port.
//!
//! Used to label a bare connection before any probe has been answered,
//! the same guess a services database lookup would give.

use dhvani_common::Transport;

/// Registered service name for `port` over `transport`, if any.
pub fn service_for_port(port: u16, transport: Transport) -> Option<&'static str> {
    match transport {
        Transport::TCP => tcp_service(port),
        Transport::UDP => udp_service(port),
    }
}

fn tcp_service(port: u16) -> Option<&'static str> {
    let name = match port {
        // remote access
        21 => "ftp",
        20 => "ftp-data",
        22 => "ssh",
        23 => "telnet",
        3389 => "ms-wbt-server",
        5900 => "vnc",
        5985 => "wsman",
        5986 => "wsmans",

        // mail
        25 => "smtp",
        110 => "pop3",
        143 => "imap",
        465 => "smtps",
        587 => "submission",
        993 => "imaps",
        995 => "pop3s",

        // web
        80 => "http",
        443 => "https",
        3128 => "squid-http",
        8000 => "http-alt",
        8080 => "http-proxy",
        8443 => "https-alt",

        // directory and naming
        53 => "domain",
        88 => "kerberos",
        389 => "ldap",
        636 => "ldaps",

        // windows and rpc
        111 => "rpcbind",
        135 => "msrpc",
        139 => "netbios-ssn",
        445 => "microsoft-ds",

        // data stores
        1433 => "ms-sql-s",
        1521 => "oracle",
        3306 => "mysql",
        5432 => "postgresql",
        6379 => "redis",
        9200 => "elasticsearch",
        11211 => "memcache",
        27017 => "mongodb",

        // messaging and infrastructure
        79 => "finger",
        119 => "nntp",
        179 => "bgp",
        873 => "rsync",
        1080 => "socks",
        1723 => "pptp",
        1883 => "mqtt",
        2049 => "nfs",
        2375 => "docker",
        5672 => "amqp",
        6443 => "kubernetes",
        6667 => "irc",
        9418 => "git",
        _ => return None,
    };
    Some(name)
}

fn udp_service(port: u16) -> Option<&'static str> {
    let name = match port {
        53 => "domain",
        67 => "dhcps",
        68 => "dhcpc",
        69 => "tftp",
        88 => "kerberos",
        111 => "rpcbind",
        123 => "ntp",
        137 => "netbios-ns",
        161 => "snmp",
        162 => "snmptrap",
        500 => "isakmp",
        514 => "syslog",
        1194 => "openvpn",
        1900 => "upnp",
        4500 => "nat-t-ike",
        5353 => "mdns",
        _ => return None,
    };
    Some(name)
}
